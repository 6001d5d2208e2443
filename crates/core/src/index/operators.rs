use crate::error::Result;
use crate::index::stacking::{IntervalForest, stack_intervals};
use crate::index::time_index::TimeIndex;
use crate::model::event::{EventKind, OperatorEvent};
use crate::parsers::RawEvent;

/// Operator events indexed by start timestamp.
///
/// Several operators may start at the same timestamp; all of them are kept.
#[derive(Debug, Clone, Default)]
pub struct OperatorIndex {
    operators: Vec<OperatorEvent>,
    by_start: TimeIndex<usize>,
}

impl OperatorIndex {
    pub fn new(operators: Vec<OperatorEvent>) -> Self {
        let by_start = TimeIndex::build(operators.iter().enumerate().map(|(i, op)| (op.start(), i)));
        tracing::debug!(
            operators = operators.len(),
            timestamps = by_start.timestamps().len(),
            "built operator index"
        );
        Self {
            operators,
            by_start,
        }
    }

    /// Build from raw records, ignoring every category but CPU operators.
    pub fn from_records(records: &[RawEvent]) -> Result<Self> {
        let operators = records
            .iter()
            .filter(|r| EventKind::of(r) == Some(EventKind::Operator))
            .map(OperatorEvent::from_raw)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(operators))
    }

    /// All operators in input order.
    pub fn operators(&self) -> &[OperatorEvent] {
        &self.operators
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Operators starting exactly at `ts`, in input order.
    pub fn at(&self, ts: i64) -> Vec<&OperatorEvent> {
        self.by_start
            .at(ts)
            .iter()
            .map(|&i| &self.operators[i])
            .collect()
    }

    /// Operators starting in `[start, end]`, nested by containment.
    ///
    /// Items of the returned forest are ordered by start timestamp, then
    /// input order.
    pub fn search_in_range(&self, start: i64, end: i64) -> IntervalForest<&OperatorEvent> {
        let hits: Vec<&OperatorEvent> = self
            .by_start
            .range(start, end)
            .map(|&i| &self.operators[i])
            .collect();
        stack_intervals(hits)
    }
}
