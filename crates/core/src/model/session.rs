use torchstack_protocol::{FoldedLine, LeafRecord};

use crate::config::{AnalysisConfig, ExportOptions, SchemaPolicy};
use crate::error::{Result, TraceError};
use crate::index::{MemoryTracker, OperatorIndex};
use crate::model::call_tree::{CallTree, CallTreeNode};
use crate::model::event::Event;
use crate::parsers::{ParseError, RawEvent, parse_trace};
use crate::views::StackLeaf;

/// One analysed trace: the call-stack forest, the operator index and the
/// memory lifetimes, each built independently from the same records.
///
/// The session is immutable once built and can be shared across threads.
#[derive(Debug, Clone)]
pub struct TraceSession {
    call_tree: CallTree,
    operators: OperatorIndex,
    memory: MemoryTracker,
    skipped_records: usize,
}

impl TraceSession {
    /// Analyse decoded trace records.
    ///
    /// Records of untracked categories are ignored. A tracked record that
    /// fails to decode aborts the build, or is dropped when the config's
    /// schema policy is [`SchemaPolicy::Skip`].
    pub fn from_records(records: &[RawEvent], config: &AnalysisConfig) -> Result<Self> {
        let mut stacks = Vec::new();
        let mut operators = Vec::new();
        let mut instants = Vec::new();
        let mut skipped_records = 0;

        for record in records {
            match Event::from_raw(record) {
                Ok(Some(Event::Stack(e))) => stacks.push(e),
                Ok(Some(Event::Operator(e))) => operators.push(e),
                Ok(Some(Event::Instant(e))) => instants.push(e),
                Ok(None) => {}
                Err(err @ TraceError::SchemaViolation { .. })
                    if config.schema_policy == SchemaPolicy::Skip =>
                {
                    tracing::warn!(error = %err, "skipping malformed record");
                    skipped_records += 1;
                }
                Err(err) => return Err(err),
            }
        }

        let session = Self {
            call_tree: CallTree::build(stacks)?,
            operators: OperatorIndex::new(operators),
            memory: MemoryTracker::build(instants)?,
            skipped_records,
        };
        tracing::debug!(
            records = records.len(),
            stack_nodes = session.call_tree.len(),
            operators = session.operators.len(),
            instants = session.memory.instants().len(),
            skipped = skipped_records,
            "trace session ready"
        );
        Ok(session)
    }

    /// Decode a trace export and analyse it.
    pub fn from_json(data: &[u8], config: &AnalysisConfig) -> Result<Self> {
        let records = parse_trace(data).map_err(ParseError::from)?;
        Self::from_records(&records, config)
    }

    pub fn call_tree(&self) -> &CallTree {
        &self.call_tree
    }

    pub fn operators(&self) -> &OperatorIndex {
        &self.operators
    }

    pub fn memory(&self) -> &MemoryTracker {
        &self.memory
    }

    /// Tracked records dropped under [`SchemaPolicy::Skip`].
    pub fn skipped_records(&self) -> usize {
        self.skipped_records
    }

    fn leaf(&self, node: &CallTreeNode) -> Result<StackLeaf<'_>> {
        let mut leaf = StackLeaf::new(&self.call_tree, node.id)?;
        leaf.attach_operators(&self.operators);
        leaf.attach_instants(&self.memory);
        Ok(leaf)
    }

    /// Every stack leaf, in input order, with its operators and memory
    /// signals attached.
    pub fn leaves(&self) -> Vec<StackLeaf<'_>> {
        self.call_tree
            .leaves()
            .filter_map(|node| self.leaf(node).ok())
            .collect()
    }

    /// Leaves that run inside at least one module layer.
    pub fn model_layer_leaves(&self) -> Vec<StackLeaf<'_>> {
        self.leaves()
            .into_iter()
            .filter(StackLeaf::is_model_layer_trace)
            .collect()
    }

    /// Leaf for a `Python id`, `None` when unknown or not a leaf.
    pub fn leaf_for(&self, stack_id: i64) -> Option<StackLeaf<'_>> {
        let id = self.call_tree.node_by_stack_id(stack_id)?;
        self.leaf(self.call_tree.node(id)).ok()
    }

    /// Folded stack lines ordered by leaf start time.
    ///
    /// With `module_only`, one line per model-layer leaf made of its module
    /// frames; otherwise one full-stack line per leaf.
    pub fn folded_lines(&self, options: &ExportOptions) -> Vec<FoldedLine> {
        let mut leaves = if options.module_only {
            self.model_layer_leaves()
        } else {
            self.leaves()
        };
        leaves.sort_by_key(|leaf| leaf.event().header().start);
        leaves
            .iter()
            .filter_map(|leaf| leaf.flame_line(options.weight, options.module_only))
            .collect()
    }

    /// Export records for every leaf, in input order.
    pub fn leaf_records(&self, options: &ExportOptions) -> Vec<LeafRecord> {
        self.leaves()
            .iter()
            .map(|leaf| leaf.to_record(options))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::tests::{instant_raw, op_raw, raw, stack_raw};
    use serde_json::json;

    fn records() -> Vec<RawEvent> {
        vec![
            raw(json!({"ph": "X", "cat": "user_annotation", "name": "ProfilerStep#2", "ts": 0, "dur": 200})),
            stack_raw(1, None, "nn.Module: Net_0", 0, 100),
            stack_raw(2, Some(1), "torch/nn/modules/module.py(1534): _call_impl", 0, 100),
            stack_raw(3, Some(2), "torch/nn/modules/linear.py(116): forward", 10, 50),
            stack_raw(4, Some(2), "torch/nn/functional.py(1500): relu", 70, 20),
            stack_raw(5, None, "train.py(10): log", 150, 5),
            op_raw("aten::linear", 12, 40),
            op_raw("aten::addmm", 15, 30),
            op_raw("aten::relu", 72, 10),
            instant_raw(0xA, 256, 20),
            instant_raw(0xA, -256, 80),
            instant_raw(0xB, 64, 75),
        ]
    }

    fn session() -> TraceSession {
        TraceSession::from_records(&records(), &AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn builds_all_structures() {
        let session = session();
        assert_eq!(session.call_tree().len(), 5);
        assert_eq!(session.operators().len(), 3);
        assert_eq!(session.memory().instants().len(), 3);
        assert_eq!(session.memory().unfreed_blocks().count(), 1);
        assert_eq!(session.skipped_records(), 0);
    }

    #[test]
    fn leaves_have_attachments() {
        let session = session();
        let leaves = session.leaves();
        assert_eq!(leaves.len(), 3);

        let linear = session.leaf_for(3).unwrap();
        assert_eq!(linear.operators().len(), 1);
        assert_eq!(linear.operators()[0].name(), "aten::linear");
        assert_eq!(linear.memory_change_history(), vec![(20, 256)]);

        let relu = session.leaf_for(4).unwrap();
        assert_eq!(relu.memory_change_history(), vec![(75, 64), (80, -192)]);

        assert!(session.leaf_for(1).is_none());
        assert!(session.leaf_for(42).is_none());
    }

    #[test]
    fn model_layer_leaves_and_folded_lines() {
        let session = session();
        assert_eq!(session.model_layer_leaves().len(), 2);

        let lines: Vec<String> = session
            .folded_lines(&ExportOptions::default())
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(lines, vec!["nn.Module: Net_0 1", "nn.Module: Net_0 1"]);

        let full: Vec<String> = session
            .folded_lines(&ExportOptions {
                module_only: false,
                weight: Some(7),
                ..ExportOptions::default()
            })
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(full.len(), 3);
        assert_eq!(
            full[0],
            "nn.Module: Net_0; torch/nn/modules/module.py(1534): _call_impl; \
             torch/nn/modules/linear.py(116): forward 7"
        );
        assert_eq!(full[2], "train.py(10): log 7");
    }

    #[test]
    fn leaf_records_follow_options() {
        let session = session();
        let records = session.leaf_records(&ExportOptions::default());
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].layer, "Net_0");
        assert_eq!(records[2].layer, "log");
        assert!(records.iter().all(|r| r.memory_history.is_none()));

        let with_history = session.leaf_records(&ExportOptions {
            include_memory_history: true,
            ..ExportOptions::default()
        });
        assert_eq!(with_history[2].memory_history, Some(vec![(0, 0)]));
    }

    #[test]
    fn schema_policy_controls_malformed_records() {
        let mut records = records();
        records.push(raw(json!({"ph": "X", "cat": "cpu_op", "name": "broken", "pid": 1, "tid": 1})));

        let strict = TraceSession::from_records(&records, &AnalysisConfig::default());
        assert!(matches!(strict, Err(TraceError::SchemaViolation { .. })));

        let config = AnalysisConfig {
            schema_policy: SchemaPolicy::Skip,
            ..AnalysisConfig::default()
        };
        let lenient = TraceSession::from_records(&records, &config).unwrap();
        assert_eq!(lenient.skipped_records(), 1);
        assert_eq!(lenient.operators().len(), 3);
    }

    #[test]
    fn structural_errors_are_not_skipped() {
        let config = AnalysisConfig {
            schema_policy: SchemaPolicy::Skip,
            ..AnalysisConfig::default()
        };
        let records = vec![stack_raw(2, Some(1), "orphan", 0, 1)];
        assert!(matches!(
            TraceSession::from_records(&records, &config),
            Err(TraceError::DanglingParent { .. })
        ));
    }

    #[test]
    fn from_json_reports_parse_errors() {
        let err = TraceSession::from_json(b"[{", &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, TraceError::Parse(_)));
    }

    #[test]
    fn session_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TraceSession>();
    }
}
