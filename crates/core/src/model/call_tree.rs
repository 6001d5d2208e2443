use std::collections::HashMap;

use crate::error::{Result, TraceError};
use crate::model::event::{EventKind, StackEvent};
use crate::parsers::RawEvent;

/// Index of a node inside its [`CallTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One Python call in the reconstructed stack forest.
#[derive(Debug, Clone)]
pub struct CallTreeNode {
    pub id: NodeId,
    pub event: StackEvent,
    parent: Option<NodeId>,
    /// In attachment order; flame output depends on this order.
    children: Vec<NodeId>,
}

impl CallTreeNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Forest of stack-call events linked through their `Python parent id`.
///
/// Nodes live in an arena and refer to each other by [`NodeId`]; a node's
/// parent is set at most once.
#[derive(Debug, Clone)]
pub struct CallTree {
    nodes: Vec<CallTreeNode>,
    by_stack_id: HashMap<i64, NodeId>,
}

impl CallTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            by_stack_id: HashMap::new(),
        }
    }

    /// Build the forest from stack events in input order.
    ///
    /// All nodes are created before any link is made, so a child may appear
    /// before its parent. A parent id that never appears is a
    /// [`TraceError::DanglingParent`].
    pub fn build(events: Vec<StackEvent>) -> Result<Self> {
        let mut tree = Self::new();
        for event in events {
            tree.insert(event)?;
        }
        for index in 0..tree.nodes.len() {
            let child = NodeId(index);
            let event = &tree.nodes[index].event;
            let Some(parent_stack_id) = event.parent_id() else {
                continue;
            };
            let parent = tree.node_by_stack_id(parent_stack_id).ok_or(
                TraceError::DanglingParent {
                    id: event.id(),
                    parent: parent_stack_id,
                },
            )?;
            tree.attach(parent, child)?;
        }
        tracing::debug!(
            nodes = tree.len(),
            roots = tree.roots().count(),
            leaves = tree.leaves().count(),
            "built call tree"
        );
        Ok(tree)
    }

    /// Build from raw records, ignoring every category but stack calls.
    pub fn from_records(records: &[RawEvent]) -> Result<Self> {
        let events = records
            .iter()
            .filter(|r| EventKind::of(r) == Some(EventKind::Stack))
            .map(StackEvent::from_raw)
            .collect::<Result<Vec<_>>>()?;
        Self::build(events)
    }

    /// Add an unlinked node. Stack ids must be unique within a tree.
    pub fn insert(&mut self, event: StackEvent) -> Result<NodeId> {
        let id = NodeId(self.nodes.len());
        if self.by_stack_id.contains_key(&event.id()) {
            return Err(TraceError::InvariantViolation(format!(
                "duplicate stack id {}",
                event.id()
            )));
        }
        self.by_stack_id.insert(event.id(), id);
        self.nodes.push(CallTreeNode {
            id,
            event,
            parent: None,
            children: Vec::new(),
        });
        Ok(id)
    }

    /// Link `child` under `parent`.
    ///
    /// Attaching a node to its current parent again is a no-op. Moving it to
    /// another parent, or below itself or one of its descendants, is a
    /// [`TraceError::InvariantViolation`].
    pub fn attach(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        match self.nodes[child.0].parent {
            Some(current) if current == parent => return Ok(()),
            Some(current) => {
                return Err(TraceError::InvariantViolation(format!(
                    "stack id {} already has parent {}, cannot move it under {}",
                    self.nodes[child.0].event.id(),
                    self.nodes[current.0].event.id(),
                    self.nodes[parent.0].event.id(),
                )));
            }
            None => {}
        }
        if self.backward_stack(parent).any(|n| n.id == child) {
            return Err(TraceError::InvariantViolation(format!(
                "linking stack id {} under {} would create a cycle",
                self.nodes[child.0].event.id(),
                self.nodes[parent.0].event.id(),
            )));
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> &CallTreeNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&CallTreeNode> {
        self.nodes.get(id.0)
    }

    /// Look up a node by its `Python id`.
    pub fn node_by_stack_id(&self, stack_id: i64) -> Option<NodeId> {
        self.by_stack_id.get(&stack_id).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in input order.
    pub fn iter(&self) -> impl Iterator<Item = &CallTreeNode> {
        self.nodes.iter()
    }

    pub fn roots(&self) -> impl Iterator<Item = &CallTreeNode> {
        self.nodes.iter().filter(|n| n.is_root())
    }

    pub fn leaves(&self) -> impl Iterator<Item = &CallTreeNode> {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Number of ancestors above `id`.
    pub fn depth(&self, id: NodeId) -> usize {
        self.backward_stack(id).count() - 1
    }

    /// Walk from `id` up to its root, both included. Each call starts a fresh walk.
    pub fn backward_stack(&self, id: NodeId) -> BackwardStack<'_> {
        BackwardStack {
            tree: self,
            next: Some(id),
        }
    }

    /// Every path from `id` down to each leaf below it, depth first, children
    /// visited in attachment order.
    pub fn forward_stack(&self, id: NodeId) -> Vec<Vec<&CallTreeNode>> {
        let mut paths = Vec::new();
        let mut path = vec![self.node(id)];
        let mut cursors = vec![0usize];

        while let Some(&node) = path.last() {
            if node.is_leaf() {
                paths.push(path.clone());
            }
            let Some(cursor) = cursors.last_mut() else {
                break;
            };
            if let Some(&child) = node.children.get(*cursor) {
                *cursor += 1;
                path.push(self.node(child));
                cursors.push(0);
            } else {
                path.pop();
                cursors.pop();
            }
        }
        paths
    }
}

impl Default for CallTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy child-to-root walk returned by [`CallTree::backward_stack`].
#[derive(Debug, Clone)]
pub struct BackwardStack<'a> {
    tree: &'a CallTree,
    next: Option<NodeId>,
}

impl<'a> Iterator for BackwardStack<'a> {
    type Item = &'a CallTreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.tree.get(self.next?)?;
        self.next = node.parent;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::tests::{op_raw, stack_raw};
    use proptest::prelude::*;

    fn tree_from(records: &[RawEvent]) -> CallTree {
        CallTree::from_records(records).unwrap()
    }

    fn names<'a>(nodes: impl IntoIterator<Item = &'a CallTreeNode>) -> Vec<&'a str> {
        nodes.into_iter().map(|n| n.event.name()).collect()
    }

    /// root(1) -> a(2) -> {b(3), c(4)}, root(1) -> d(5)
    fn sample() -> CallTree {
        tree_from(&[
            stack_raw(1, None, "root", 0, 100),
            stack_raw(2, Some(1), "a", 0, 50),
            stack_raw(3, Some(2), "b", 0, 10),
            op_raw("aten::mm", 5, 1),
            stack_raw(4, Some(2), "c", 20, 10),
            stack_raw(5, Some(1), "d", 60, 10),
        ])
    }

    #[test]
    fn builds_forest_in_input_order() {
        let tree = sample();
        assert_eq!(tree.len(), 5);
        assert_eq!(names(tree.roots()), vec!["root"]);
        assert_eq!(names(tree.leaves()), vec!["b", "c", "d"]);

        let a = tree.node_by_stack_id(2).unwrap();
        assert_eq!(names(tree.node(a).children().iter().map(|&c| tree.node(c))), vec!["b", "c"]);
    }

    #[test]
    fn backward_stack_walks_to_root() {
        let tree = sample();
        let c = tree.node_by_stack_id(4).unwrap();
        assert_eq!(names(tree.backward_stack(c)), vec!["c", "a", "root"]);
        // restartable
        assert_eq!(tree.backward_stack(c).count(), 3);
        assert_eq!(tree.depth(c), 2);
    }

    #[test]
    fn forward_stack_lists_every_path() {
        let tree = sample();
        let root = tree.node_by_stack_id(1).unwrap();
        let paths: Vec<Vec<&str>> = tree.forward_stack(root).into_iter().map(names).collect();
        assert_eq!(
            paths,
            vec![
                vec!["root", "a", "b"],
                vec!["root", "a", "c"],
                vec!["root", "d"],
            ]
        );

        let d = tree.node_by_stack_id(5).unwrap();
        assert_eq!(tree.forward_stack(d).len(), 1);
    }

    #[test]
    fn child_before_parent_is_linked() {
        let tree = tree_from(&[
            stack_raw(2, Some(1), "child", 5, 1),
            stack_raw(1, None, "parent", 0, 10),
        ]);
        let child = tree.node_by_stack_id(2).unwrap();
        assert_eq!(names(tree.backward_stack(child)), vec!["child", "parent"]);
    }

    #[test]
    fn dangling_parent_errors() {
        let err = CallTree::from_records(&[stack_raw(2, Some(99), "orphan", 0, 1)]).unwrap_err();
        assert!(matches!(err, TraceError::DanglingParent { id: 2, parent: 99 }));
    }

    #[test]
    fn duplicate_stack_id_errors() {
        let err = CallTree::from_records(&[
            stack_raw(1, None, "a", 0, 1),
            stack_raw(1, None, "b", 0, 1),
        ])
        .unwrap_err();
        assert!(matches!(err, TraceError::InvariantViolation(_)));
    }

    #[test]
    fn reparenting_is_rejected() {
        let mut tree = sample();
        let b = tree.node_by_stack_id(3).unwrap();
        let a = tree.node_by_stack_id(2).unwrap();
        let d = tree.node_by_stack_id(5).unwrap();

        assert!(tree.attach(a, b).is_ok());
        let err = tree.attach(d, b).unwrap_err();
        assert!(matches!(err, TraceError::InvariantViolation(_)));
        assert_eq!(tree.node(b).parent(), Some(a));
    }

    #[test]
    fn cycles_are_rejected() {
        let err = CallTree::from_records(&[
            stack_raw(1, Some(2), "a", 0, 1),
            stack_raw(2, Some(1), "b", 0, 1),
        ])
        .unwrap_err();
        assert!(matches!(err, TraceError::InvariantViolation(_)));

        let err = CallTree::from_records(&[stack_raw(1, Some(1), "self", 0, 1)]).unwrap_err();
        assert!(matches!(err, TraceError::InvariantViolation(_)));
    }

    proptest! {
        #[test]
        fn backward_stack_length_is_depth_plus_one(parents in prop::collection::vec(any::<prop::sample::Index>(), 1..60)) {
            // Node i (i > 0) picks a parent among the nodes before it; node 0 is the root.
            let records: Vec<RawEvent> = parents
                .iter()
                .enumerate()
                .map(|(i, pick)| {
                    let parent = (i > 0).then(|| pick.index(i) as i64);
                    stack_raw(i as i64, parent, &format!("f{i}"), 0, 1)
                })
                .collect();
            let tree = tree_from(&records);

            for node in tree.iter() {
                let mut expected_depth = 0;
                let mut cursor = node.event.parent_id();
                while let Some(p) = cursor {
                    expected_depth += 1;
                    cursor = records[p as usize].args.as_ref()
                        .and_then(|a| a.get("Python parent id"))
                        .and_then(serde_json::Value::as_i64);
                }
                let walk: Vec<_> = tree.backward_stack(node.id).collect();
                prop_assert_eq!(walk.len(), expected_depth + 1);
                prop_assert!(walk.last().is_some_and(|n| n.is_root()));
            }
        }
    }
}
