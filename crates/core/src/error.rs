use thiserror::Error;

use crate::parsers::ParseError;

/// Errors raised while building or querying a trace analysis.
///
/// All of them are deterministic: they mean the input does not follow the
/// profiler trace format, so retrying never helps.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("schema violation in {expected} record {name:?}: {reason}")]
    SchemaViolation {
        expected: &'static str,
        name: String,
        reason: String,
    },
    #[error("stack event {id} references unknown parent {parent}")]
    DanglingParent { id: i64, parent: i64 },
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error(
        "corrupt pairing at address {address:#x}: allocation of {alloc_bytes} bytes at {alloc_ts} \
         closed by delta {free_bytes} at {free_ts}"
    )]
    CorruptPairing {
        address: u64,
        alloc_ts: i64,
        alloc_bytes: i64,
        free_ts: i64,
        free_bytes: i64,
    },
}

impl TraceError {
    pub(crate) fn schema(
        expected: &'static str,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SchemaViolation {
            expected,
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = TraceError> = std::result::Result<T, E>;
