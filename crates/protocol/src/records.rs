use serde::{Deserialize, Serialize};

/// Exported summary of one stack leaf.
///
/// `id` is the hex SHA-256 of the leaf's full folded line, stable across
/// repeated analyses of the same trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafRecord {
    pub layer: String,
    pub start: i64,
    pub end: i64,
    pub duration: i64,
    pub id: String,
    /// Running byte total per memory signal, as `(timestamp, bytes)` pairs.
    /// Only present when requested at export time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_history: Option<Vec<(i64, i64)>>,
}

/// Exported lifetime of one allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBlockRecord {
    pub address: u64,
    pub bytes: i64,
    pub alloc_time: i64,
    pub free_time: Option<i64>,
    pub duration: Option<i64>,
    pub is_freed: bool,
}
