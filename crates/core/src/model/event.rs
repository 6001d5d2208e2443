//! Typed views over raw profiler records.
//!
//! Three record categories are tracked: Python stack calls, CPU operators and
//! CPU memory instants. Every typed event is built from a [`RawEvent`] and
//! refuses records of another category.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, TraceError};
use crate::parsers::RawEvent;

pub const STACK_CATEGORY: &str = "python_function";
pub const OPERATOR_CATEGORY: &str = "cpu_op";
pub const INSTANT_CATEGORY: &str = "cpu_instant_event";

/// Function-name segment used when a name has no separator.
pub const UNKNOWN_FUNCTION: &str = "unknown";

#[allow(clippy::expect_used)]
static BUILTIN_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<built-in\s+(method|function)\s+\w+.*?>").expect("builtin call pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Stack,
    Operator,
    Instant,
}

impl EventKind {
    pub fn category(self) -> &'static str {
        match self {
            Self::Stack => STACK_CATEGORY,
            Self::Operator => OPERATOR_CATEGORY,
            Self::Instant => INSTANT_CATEGORY,
        }
    }

    pub fn from_category(category: &str) -> Option<Self> {
        match category {
            STACK_CATEGORY => Some(Self::Stack),
            OPERATOR_CATEGORY => Some(Self::Operator),
            INSTANT_CATEGORY => Some(Self::Instant),
            _ => None,
        }
    }

    /// Kind of a raw record, `None` for untracked categories.
    pub fn of(raw: &RawEvent) -> Option<Self> {
        raw.cat.as_deref().and_then(Self::from_category)
    }
}

/// Fields shared by every tracked record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub ph: String,
    pub category: String,
    pub name: String,
    pub start: i64,
    /// Never negative; 0 when the record carries no duration.
    pub duration: i64,
    pub pid: i64,
    pub tid: i64,
}

impl EventHeader {
    fn from_raw(raw: &RawEvent, kind: EventKind) -> Result<Self> {
        let expected = kind.category();
        match raw.cat.as_deref() {
            Some(cat) if cat == expected => {}
            other => {
                return Err(TraceError::schema(
                    expected,
                    &raw.name,
                    format!("category is {other:?}"),
                ));
            }
        }
        let start = raw
            .ts
            .ok_or_else(|| TraceError::schema(expected, &raw.name, "missing ts"))?;
        let duration = raw.dur.unwrap_or(0);
        if duration < 0 {
            return Err(TraceError::schema(
                expected,
                &raw.name,
                format!("negative duration {duration}"),
            ));
        }
        let pid = raw
            .pid
            .ok_or_else(|| TraceError::schema(expected, &raw.name, "missing integer pid"))?;
        let tid = raw
            .tid
            .ok_or_else(|| TraceError::schema(expected, &raw.name, "missing integer tid"))?;

        Ok(Self {
            ph: raw.ph.clone(),
            category: expected.to_string(),
            name: raw.name.clone(),
            start,
            duration,
            pid,
            tid,
        })
    }

    pub fn end(&self) -> i64 {
        self.start + self.duration
    }
}

fn decode_args<T: DeserializeOwned>(raw: &RawEvent, kind: EventKind) -> Result<T> {
    let args = raw
        .args
        .clone()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(args)
        .map_err(|e| TraceError::schema(kind.category(), &raw.name, e.to_string()))
}

fn namespace_of(parts: &[String]) -> String {
    parts.first().map(|p| p.trim().to_string()).unwrap_or_default()
}

fn function_of(parts: &[String]) -> String {
    parts.get(1..).unwrap_or_default().join(" ").trim().to_string()
}

/// Split a Python frame name into namespace and function segments.
///
/// `threading.py(1016): _bootstrap_inner` splits on `:`; built-in calls such as
/// `<built-in method startswith of str object at 0x7a51>` split after the
/// `method`/`function` keyword. A name without separator gets
/// [`UNKNOWN_FUNCTION`] as its function segment.
pub fn parse_stack_name(name: &str) -> Vec<String> {
    let mut parts: Vec<String> = match BUILTIN_CALL.captures(name) {
        Some(caps) => match caps.get(1) {
            Some(keyword) => vec![
                format!("built-in {}", keyword.as_str()),
                name[keyword.end()..].to_string(),
            ],
            None => vec![name.to_string()],
        },
        None => name.split(':').map(String::from).collect(),
    };
    if parts.len() == 1 {
        parts.push(UNKNOWN_FUNCTION.to_string());
    }
    parts
}

/// Split an operator name: `": "` first, then `"::"`, else `("op", name)`.
pub fn parse_operator_name(name: &str) -> Vec<String> {
    if name.contains(": ") {
        name.split(": ").map(String::from).collect()
    } else if name.contains("::") {
        name.split("::").map(String::from).collect()
    } else {
        vec!["op".to_string(), name.to_string()]
    }
}

#[derive(Debug, Deserialize)]
struct StackArgs {
    #[serde(rename = "Python id")]
    id: i64,
    #[serde(rename = "Python parent id", default)]
    parent_id: Option<i64>,
}

/// One Python function call span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEvent {
    header: EventHeader,
    id: i64,
    parent_id: Option<i64>,
    namespace: String,
    function: String,
}

impl StackEvent {
    pub fn from_raw(raw: &RawEvent) -> Result<Self> {
        let header = EventHeader::from_raw(raw, EventKind::Stack)?;
        let args: StackArgs = decode_args(raw, EventKind::Stack)?;
        let parts = parse_stack_name(&header.name);
        Ok(Self {
            namespace: namespace_of(&parts),
            function: function_of(&parts),
            header,
            id: args.id,
            parent_id: args.parent_id,
        })
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// `None` for a root call.
    pub fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }

    pub fn name_parts(&self) -> Vec<String> {
        parse_stack_name(&self.header.name)
    }

    pub fn namespace_name(&self) -> &str {
        &self.namespace
    }

    pub fn function_name(&self) -> &str {
        &self.function
    }

    /// `_call_impl` runs right below a module's own frame, so a frame with this
    /// flag marks its *parent* as a module layer (e.g. `nn.Module: ReLU_0`).
    pub fn is_module_layer(&self) -> bool {
        self.function.contains("_call_impl")
    }

    pub fn is_getattr(&self) -> bool {
        self.function.contains("__getattr__")
    }
}

/// One entry of an operator's `Input Dims`: a size, or a nested shape for
/// tensor-list inputs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Size(i64),
    Shape(Vec<Dim>),
}

#[derive(Debug, Deserialize)]
struct OperatorArgs {
    #[serde(rename = "Input type", default)]
    input_types: Vec<String>,
    #[serde(rename = "Input Dims", default)]
    input_dims: Vec<Vec<Dim>>,
    #[serde(rename = "Concrete Inputs", default)]
    concrete_inputs: Vec<Value>,
    #[serde(rename = "Sequence number", default)]
    sequence_number: Option<i64>,
    #[serde(rename = "Fwd thread id", default)]
    forward_thread_id: Option<i64>,
}

/// An input position that carries a tensor shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputArg<'a> {
    pub index: usize,
    pub input_type: &'a str,
    pub dims: &'a [Dim],
}

/// An input position that carries a concrete scalar value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteInput<'a> {
    pub index: usize,
    pub input_type: &'a str,
    pub value: &'a str,
}

/// One flat CPU operator span (`aten::linear`, `aten::to`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorEvent {
    header: EventHeader,
    input_types: Vec<String>,
    input_dims: Vec<Vec<Dim>>,
    concrete_inputs: Vec<String>,
    sequence_number: Option<i64>,
    forward_thread_id: Option<i64>,
}

impl OperatorEvent {
    pub fn from_raw(raw: &RawEvent) -> Result<Self> {
        let header = EventHeader::from_raw(raw, EventKind::Operator)?;
        let args: OperatorArgs = decode_args(raw, EventKind::Operator)?;
        let concrete_inputs = args
            .concrete_inputs
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect();
        Ok(Self {
            header,
            input_types: args.input_types,
            input_dims: args.input_dims,
            concrete_inputs,
            sequence_number: args.sequence_number,
            forward_thread_id: args.forward_thread_id,
        })
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn start(&self) -> i64 {
        self.header.start
    }

    pub fn end(&self) -> i64 {
        self.header.end()
    }

    pub fn name_parts(&self) -> Vec<String> {
        parse_operator_name(&self.header.name)
    }

    pub fn namespace_name(&self) -> String {
        namespace_of(&self.name_parts())
    }

    pub fn function_name(&self) -> String {
        function_of(&self.name_parts())
    }

    pub fn input_types(&self) -> &[String] {
        &self.input_types
    }

    pub fn input_dims(&self) -> &[Vec<Dim>] {
        &self.input_dims
    }

    pub fn concrete_inputs(&self) -> &[String] {
        &self.concrete_inputs
    }

    pub fn args_number(&self) -> usize {
        self.input_types.len()
    }

    fn input_type_at(&self, index: usize) -> &str {
        self.input_types.get(index).map_or("", String::as_str)
    }

    /// Positions whose shape is non-empty.
    pub fn input_args(&self) -> Vec<InputArg<'_>> {
        self.input_dims
            .iter()
            .enumerate()
            .filter(|(_, dims)| !dims.is_empty())
            .map(|(index, dims)| InputArg {
                index,
                input_type: self.input_type_at(index),
                dims,
            })
            .collect()
    }

    /// Positions whose concrete value is not the empty-string sentinel.
    pub fn concrete_args(&self) -> Vec<ConcreteInput<'_>> {
        self.concrete_inputs
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.is_empty())
            .map(|(index, value)| ConcreteInput {
                index,
                input_type: self.input_type_at(index),
                value,
            })
            .collect()
    }

    pub fn sequence_number(&self) -> Option<i64> {
        self.sequence_number
    }

    /// Present only for operators scheduled from a backward pass.
    pub fn forward_thread_id(&self) -> Option<i64> {
        self.forward_thread_id
    }

    pub fn is_autograd_enabled(&self) -> bool {
        self.sequence_number.is_some()
    }

    pub fn is_aten_op(&self) -> bool {
        self.header.name.contains("aten")
    }
}

#[derive(Debug, Deserialize)]
struct InstantArgs {
    #[serde(rename = "Total Reserved")]
    total_reserved: i64,
    #[serde(rename = "Total Allocated")]
    total_allocated: i64,
    #[serde(rename = "Bytes")]
    bytes: i64,
    #[serde(rename = "Addr")]
    address: u64,
    #[serde(rename = "Device Id")]
    device_id: i64,
    #[serde(rename = "Device Type")]
    device_type: i64,
}

/// A point-in-time allocator signal. Positive `bytes` allocate, negative free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantEvent {
    header: EventHeader,
    total_reserved: i64,
    total_allocated: i64,
    bytes: i64,
    address: u64,
    device_id: i64,
    device_type: i64,
}

impl InstantEvent {
    pub fn from_raw(raw: &RawEvent) -> Result<Self> {
        let header = EventHeader::from_raw(raw, EventKind::Instant)?;
        let args: InstantArgs = decode_args(raw, EventKind::Instant)?;
        Ok(Self {
            header,
            total_reserved: args.total_reserved,
            total_allocated: args.total_allocated,
            bytes: args.bytes,
            address: args.address,
            device_id: args.device_id,
            device_type: args.device_type,
        })
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn timestamp(&self) -> i64 {
        self.header.start
    }

    pub fn name_parts(&self) -> Vec<String> {
        vec!["cpu".to_string(), "memory".to_string()]
    }

    pub fn total_reserved(&self) -> i64 {
        self.total_reserved
    }

    pub fn total_allocated(&self) -> i64 {
        self.total_allocated
    }

    pub fn bytes(&self) -> i64 {
        self.bytes
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    pub fn device_type(&self) -> i64 {
        self.device_type
    }

    pub fn is_allocation(&self) -> bool {
        self.bytes > 0
    }
}

/// A tracked record of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Stack(StackEvent),
    Operator(OperatorEvent),
    Instant(InstantEvent),
}

impl Event {
    /// Build the typed event for a raw record, or `None` when the record's
    /// category is not tracked.
    pub fn from_raw(raw: &RawEvent) -> Result<Option<Self>> {
        let Some(kind) = EventKind::of(raw) else {
            return Ok(None);
        };
        let event = match kind {
            EventKind::Stack => Self::Stack(StackEvent::from_raw(raw)?),
            EventKind::Operator => Self::Operator(OperatorEvent::from_raw(raw)?),
            EventKind::Instant => Self::Instant(InstantEvent::from_raw(raw)?),
        };
        Ok(Some(event))
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Stack(_) => EventKind::Stack,
            Self::Operator(_) => EventKind::Operator,
            Self::Instant(_) => EventKind::Instant,
        }
    }

    pub fn header(&self) -> &EventHeader {
        match self {
            Self::Stack(e) => e.header(),
            Self::Operator(e) => e.header(),
            Self::Instant(e) => e.header(),
        }
    }

    pub fn name_parts(&self) -> Vec<String> {
        match self {
            Self::Stack(e) => e.name_parts(),
            Self::Operator(e) => e.name_parts(),
            Self::Instant(e) => e.name_parts(),
        }
    }

    pub fn namespace_name(&self) -> String {
        namespace_of(&self.name_parts())
    }

    pub fn function_name(&self) -> String {
        function_of(&self.name_parts())
    }
}
