use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PytorchParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One decoded record of a PyTorch profiler trace (Chrome trace event format).
///
/// Only the fields shared by every row are typed here; the category specific
/// payload stays in `args` until a typed event is built from it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub ph: String,
    #[serde(default)]
    pub cat: Option<String>,
    #[serde(default)]
    pub name: String,
    /// Metadata rows use string labels here ("Spans", "Traces"); those decode to `None`.
    #[serde(default, deserialize_with = "integer_or_label")]
    pub pid: Option<i64>,
    #[serde(default, deserialize_with = "integer_or_label")]
    pub tid: Option<i64>,
    #[serde(default, deserialize_with = "timestamp")]
    pub ts: Option<i64>,
    #[serde(default, deserialize_with = "timestamp")]
    pub dur: Option<i64>,
    #[serde(default)]
    pub args: Option<Value>,
}

/// Top-level trace JSON: either the exported object or a bare event array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TraceFile {
    Object {
        #[serde(rename = "traceEvents")]
        trace_events: Vec<RawEvent>,
    },
    Array(Vec<RawEvent>),
}

/// Decode a profiler trace export into its flat list of records.
pub fn parse_trace(data: &[u8]) -> Result<Vec<RawEvent>, PytorchParseError> {
    let trace_file: TraceFile = serde_json::from_slice(data)?;
    let events = match trace_file {
        TraceFile::Object { trace_events } => trace_events,
        TraceFile::Array(events) => events,
    };
    tracing::debug!(records = events.len(), "decoded trace records");
    Ok(events)
}

fn integer_or_label<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_i64))
}

/// Profiler timestamps are integers, but some exporters write fractional
/// microseconds. Those are rounded to the nearest integer.
fn timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(Some(i)),
            None => n
                .as_f64()
                .map(|f| Some(f.round() as i64))
                .ok_or_else(|| serde::de::Error::custom("timestamp out of range")),
        },
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a numeric timestamp, got {other}"
        ))),
    }
}
