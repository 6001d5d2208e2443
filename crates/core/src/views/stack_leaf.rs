use sha2::{Digest, Sha256};
use torchstack_protocol::{FoldedLine, LeafRecord};

use crate::config::ExportOptions;
use crate::error::{Result, TraceError};
use crate::index::{MemoryTracker, OperatorIndex};
use crate::model::call_tree::{CallTree, CallTreeNode, NodeId};
use crate::model::event::{InstantEvent, OperatorEvent, StackEvent};

/// A call with no recorded children, plus the operators and memory signals
/// found in its time window.
///
/// The leaf borrows everything from the analysed trace; attaching the same
/// event twice has no effect.
#[derive(Debug, Clone)]
pub struct StackLeaf<'a> {
    tree: &'a CallTree,
    node: NodeId,
    operators: Vec<&'a OperatorEvent>,
    instants: Vec<&'a InstantEvent>,
}

impl<'a> StackLeaf<'a> {
    pub fn new(tree: &'a CallTree, node: NodeId) -> Result<Self> {
        let Some(entry) = tree.get(node) else {
            return Err(TraceError::InvariantViolation(format!(
                "node {} is not part of this call tree",
                node.index()
            )));
        };
        if !entry.is_leaf() {
            return Err(TraceError::InvariantViolation(format!(
                "stack id {} has children and cannot be a leaf",
                entry.event.id()
            )));
        }
        Ok(Self {
            tree,
            node,
            operators: Vec::new(),
            instants: Vec::new(),
        })
    }

    pub fn node(&self) -> &'a CallTreeNode {
        self.tree.node(self.node)
    }

    pub fn event(&self) -> &'a StackEvent {
        &self.node().event
    }

    pub fn operators(&self) -> &[&'a OperatorEvent] {
        &self.operators
    }

    pub fn instants(&self) -> &[&'a InstantEvent] {
        &self.instants
    }

    pub fn add_operator(&mut self, operator: &'a OperatorEvent) {
        if !self.operators.iter().any(|&o| std::ptr::eq(o, operator)) {
            self.operators.push(operator);
        }
    }

    pub fn remove_operator(&mut self, operator: &OperatorEvent) {
        self.operators.retain(|&o| !std::ptr::eq(o, operator));
    }

    pub fn add_instant(&mut self, instant: &'a InstantEvent) {
        if !self.instants.iter().any(|&i| std::ptr::eq(i, instant)) {
            self.instants.push(instant);
        }
    }

    pub fn remove_instant(&mut self, instant: &InstantEvent) {
        self.instants.retain(|&i| !std::ptr::eq(i, instant));
    }

    /// Attach the top-level operators that start inside this leaf's span.
    pub fn attach_operators(&mut self, index: &'a OperatorIndex) {
        let header = self.event().header();
        let forest = index.search_in_range(header.start, header.end());
        for &op in forest.root_items() {
            self.add_operator(op);
        }
    }

    /// Attach the memory signals recorded inside this leaf's span.
    pub fn attach_instants(&mut self, memory: &'a MemoryTracker) {
        let header = self.event().header();
        for instant in memory.search_instants_in_range(header.start, header.end()) {
            self.add_instant(instant);
        }
    }

    /// Module frames above this leaf, root first.
    ///
    /// A `_call_impl` frame marks its parent as the module's own frame.
    pub fn module_layers(&self) -> Vec<&'a CallTreeNode> {
        let mut layers: Vec<&CallTreeNode> = self
            .tree
            .backward_stack(self.node)
            .filter(|n| n.event.is_module_layer())
            .filter_map(|n| n.parent().map(|p| self.tree.node(p)))
            .collect();
        layers.reverse();
        layers
    }

    pub fn is_model_layer_trace(&self) -> bool {
        self.tree
            .backward_stack(self.node)
            .any(|n| n.event.is_module_layer())
    }

    /// Module path such as `Net_0->Linear_0` built from module function
    /// names, or the leaf's own function name outside any module.
    pub fn module_name(&self) -> String {
        let layers = self.module_layers();
        if layers.is_empty() {
            return self.event().function_name().to_string();
        }
        layers
            .iter()
            .map(|n| n.event.function_name())
            .collect::<Vec<_>>()
            .join("->")
    }

    /// Folded stack line from the root down to this leaf.
    ///
    /// With `module_only`, only module frames are kept; `None` when no frame
    /// remains.
    pub fn flame_line(&self, weight: Option<u64>, module_only: bool) -> Option<FoldedLine> {
        let frames: Vec<&CallTreeNode> = if module_only {
            self.module_layers()
        } else {
            let mut frames: Vec<_> = self.tree.backward_stack(self.node).collect();
            frames.reverse();
            frames
        };
        FoldedLine::new(frames.iter().map(|n| n.event.name()), weight)
    }

    pub fn flame_string(&self, weight: Option<u64>, module_only: bool) -> Option<String> {
        self.flame_line(weight, module_only)
            .map(|line| line.to_string())
    }

    /// Hex SHA-256 of the full folded line; identical call paths share an id
    /// across runs.
    pub fn leaf_id(&self) -> String {
        let line = self.flame_string(None, false).unwrap_or_default();
        hex::encode(Sha256::digest(line.as_bytes()))
    }

    /// Running byte total of the attached memory signals, ordered by time.
    /// Without signals the history is the single pair `(0, 0)`.
    pub fn memory_change_history(&self) -> Vec<(i64, i64)> {
        let mut instants = self.instants.clone();
        instants.sort_by_key(|i| i.timestamp());

        let mut total = 0;
        let mut history: Vec<(i64, i64)> = instants
            .iter()
            .map(|i| {
                total += i.bytes();
                (i.timestamp(), total)
            })
            .collect();
        if history.is_empty() {
            history.push((0, 0));
        }
        history
    }

    pub fn max_memory_usage(&self) -> i64 {
        self.memory_change_history()
            .iter()
            .map(|&(_, bytes)| bytes)
            .max()
            .unwrap_or(0)
    }

    pub fn to_record(&self, options: &ExportOptions) -> LeafRecord {
        let header = self.event().header();
        LeafRecord {
            layer: self.module_name(),
            start: header.start,
            end: header.end(),
            duration: header.duration,
            id: self.leaf_id(),
            memory_history: options
                .include_memory_history
                .then(|| self.memory_change_history()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::tests::{instant_raw, op_raw, stack_raw};
    use crate::parsers::RawEvent;

    fn leaf<'a>(tree: &'a CallTree, stack_id: i64) -> StackLeaf<'a> {
        StackLeaf::new(tree, tree.node_by_stack_id(stack_id).unwrap()).unwrap()
    }

    /// nn.Module: Net_0 -> _call_impl -> forward -> nn.Module: Linear_0 -> _call_impl -> linear
    fn module_records() -> Vec<RawEvent> {
        vec![
            stack_raw(1, None, "nn.Module: Net_0", 0, 100),
            stack_raw(2, Some(1), "torch/nn/modules/module.py(1534): _call_impl", 0, 100),
            stack_raw(3, Some(2), "model.py(20): forward", 0, 100),
            stack_raw(4, Some(3), "nn.Module: Linear_0", 10, 50),
            stack_raw(5, Some(4), "torch/nn/modules/module.py(1534): _call_impl", 10, 50),
            stack_raw(6, Some(5), "torch/nn/modules/linear.py(116): forward", 10, 50),
        ]
    }

    #[test]
    fn flame_string_is_root_first() {
        let tree = CallTree::from_records(&[
            stack_raw(1, None, "A", 0, 10),
            stack_raw(2, Some(1), "B", 0, 10),
            stack_raw(3, Some(2), "C", 0, 10),
        ])
        .unwrap();
        let leaf = leaf(&tree, 3);
        assert_eq!(leaf.flame_string(None, false).as_deref(), Some("A; B; C 1"));
        assert_eq!(leaf.flame_string(Some(5), false).as_deref(), Some("A; B; C 5"));
        assert!(!leaf.is_model_layer_trace());
        assert_eq!(leaf.flame_string(None, true), None);
        assert_eq!(leaf.module_name(), "unknown");
    }

    #[test]
    fn module_layers_come_from_call_impl_parents() {
        let tree = CallTree::from_records(&module_records()).unwrap();
        let leaf = leaf(&tree, 6);
        assert!(leaf.is_model_layer_trace());
        assert_eq!(leaf.module_name(), "Net_0->Linear_0");
        assert_eq!(
            leaf.flame_string(None, true).as_deref(),
            Some("nn.Module: Net_0; nn.Module: Linear_0 1")
        );
    }

    #[test]
    fn non_leaf_is_rejected() {
        let tree = CallTree::from_records(&module_records()).unwrap();
        let node = tree.node_by_stack_id(4).unwrap();
        assert!(matches!(
            StackLeaf::new(&tree, node),
            Err(TraceError::InvariantViolation(_))
        ));
    }

    #[test]
    fn leaf_id_is_stable_sha256() {
        let tree = CallTree::from_records(&module_records()).unwrap();
        let first = leaf(&tree, 6).leaf_id();
        let again = CallTree::from_records(&module_records()).unwrap();
        assert_eq!(first, leaf(&again, 6).leaf_id());
        assert_eq!(first.len(), 64);

        let expected = hex::encode(Sha256::digest(
            leaf(&tree, 6).flame_string(None, false).unwrap().as_bytes(),
        ));
        assert_eq!(first, expected);
    }

    #[test]
    fn attachments_are_deduplicated() {
        let tree = CallTree::from_records(&module_records()).unwrap();
        let ops = OperatorIndex::from_records(&[
            op_raw("aten::linear", 12, 40),
            op_raw("aten::addmm", 15, 30),
            op_raw("aten::relu", 70, 5),
        ])
        .unwrap();
        let mut leaf = leaf(&tree, 6);
        leaf.attach_operators(&ops);
        leaf.attach_operators(&ops);

        let names: Vec<_> = leaf.operators().iter().map(|op| op.name()).collect();
        assert_eq!(names, vec!["aten::linear"]);

        leaf.remove_operator(&ops.operators()[0]);
        assert!(leaf.operators().is_empty());
    }

    #[test]
    fn memory_history_is_running_sum() {
        let tree = CallTree::from_records(&module_records()).unwrap();
        let memory = MemoryTracker::from_records(&[
            instant_raw(0x10, 400, 30),
            instant_raw(0x20, 100, 20),
            instant_raw(0x20, -100, 40),
            instant_raw(0x30, 999, 90),
        ])
        .unwrap();
        let mut leaf = leaf(&tree, 6);
        assert_eq!(leaf.memory_change_history(), vec![(0, 0)]);

        leaf.attach_instants(&memory);
        leaf.attach_instants(&memory);
        assert_eq!(leaf.instants().len(), 3);
        assert_eq!(leaf.memory_change_history(), vec![(20, 100), (30, 500), (40, 400)]);
        assert_eq!(leaf.max_memory_usage(), 500);

        leaf.remove_instant(leaf.instants()[0]);
        assert_eq!(leaf.instants().len(), 2);
    }

    #[test]
    fn record_export() {
        let tree = CallTree::from_records(&module_records()).unwrap();
        let leaf = leaf(&tree, 6);

        let record = leaf.to_record(&ExportOptions::default());
        assert_eq!(record.layer, "Net_0->Linear_0");
        assert_eq!((record.start, record.end, record.duration), (10, 60, 50));
        assert_eq!(record.id, leaf.leaf_id());
        assert!(record.memory_history.is_none());

        let with_history = leaf.to_record(&ExportOptions {
            include_memory_history: true,
            ..ExportOptions::default()
        });
        assert_eq!(with_history.memory_history, Some(vec![(0, 0)]));
    }
}
