//! Containment forest over flat time intervals.
//!
//! Interval `a` nests under `b` when `b.start <= a.start && b.end >= a.end`.
//! Among all containing candidates the parent is the last one after sorting
//! by `(start ascending, end descending)`, i.e. the tightest. Each call is
//! O(n²) in the number of intervals, so callers narrow the set with a range
//! query first.

use std::cmp::Reverse;

use crate::model::event::OperatorEvent;

/// Anything with an inclusive `[start, end]` time span.
pub trait Interval {
    fn start(&self) -> i64;
    fn end(&self) -> i64;
}

impl Interval for OperatorEvent {
    fn start(&self) -> i64 {
        OperatorEvent::start(self)
    }

    fn end(&self) -> i64 {
        OperatorEvent::end(self)
    }
}

impl<T: Interval + ?Sized> Interval for &T {
    fn start(&self) -> i64 {
        (**self).start()
    }

    fn end(&self) -> i64 {
        (**self).end()
    }
}

#[derive(Debug, Clone)]
struct Slot {
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Result of [`stack_intervals`]: the input items plus their nesting.
///
/// Positions refer to the order of the input slice. Children are listed in
/// input order.
#[derive(Debug, Clone)]
pub struct IntervalForest<T> {
    items: Vec<T>,
    slots: Vec<Slot>,
    roots: Vec<usize>,
}

impl<T> IntervalForest<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, pos: usize) -> &T {
        &self.items[pos]
    }

    /// All items in input order.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn root_items(&self) -> impl Iterator<Item = &T> {
        self.roots.iter().map(|&pos| &self.items[pos])
    }

    pub fn parent(&self, pos: usize) -> Option<usize> {
        self.slots[pos].parent
    }

    pub fn children(&self, pos: usize) -> &[usize] {
        &self.slots[pos].children
    }

    /// Nesting depth of `pos`, 0 for roots.
    pub fn depth(&self, pos: usize) -> usize {
        let mut depth = 0;
        let mut cursor = self.slots[pos].parent;
        while let Some(p) = cursor {
            depth += 1;
            cursor = self.slots[p].parent;
        }
        depth
    }
}

/// Rebuild the containment forest of `items`.
///
/// An item never contains itself. Two identical spans would contain each
/// other, so only the earlier one in input order counts as the container,
/// which keeps the result acyclic.
pub fn stack_intervals<T: Interval>(items: Vec<T>) -> IntervalForest<T> {
    let mut slots: Vec<Slot> = (0..items.len())
        .map(|_| Slot {
            parent: None,
            children: Vec::new(),
        })
        .collect();
    let mut roots = Vec::new();

    for (pos, item) in items.iter().enumerate() {
        let (start, end) = (item.start(), item.end());
        let mut candidates: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|&(other, candidate)| {
                other != pos
                    && candidate.start() <= start
                    && candidate.end() >= end
                    && !(candidate.start() == start && candidate.end() == end && other > pos)
            })
            .map(|(other, _)| other)
            .collect();
        candidates.sort_by_key(|&c| (items[c].start(), Reverse(items[c].end())));

        match candidates.last() {
            Some(&parent) => {
                slots[pos].parent = Some(parent);
                slots[parent].children.push(pos);
            }
            None => roots.push(pos),
        }
    }

    IntervalForest {
        items,
        slots,
        roots,
    }
}
