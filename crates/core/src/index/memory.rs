use std::collections::HashMap;

use crate::error::{Result, TraceError};
use crate::index::time_index::TimeIndex;
use crate::model::event::{EventKind, InstantEvent};
use crate::model::memory::MemoryBlock;
use crate::parsers::RawEvent;

/// Pairs allocation and free instants by address.
///
/// Instants are processed in timestamp order. The first signal at an address
/// opens a block; the next one at the same address must free exactly the
/// same number of bytes and closes it. Blocks still open at the end are kept
/// as unfreed blocks.
#[derive(Debug, Clone, Default)]
pub struct MemoryTracker {
    instants: Vec<InstantEvent>,
    by_time: TimeIndex<usize>,
    blocks: TimeIndex<MemoryBlock>,
    orphan_frees: Vec<usize>,
}

impl MemoryTracker {
    pub fn build(mut instants: Vec<InstantEvent>) -> Result<Self> {
        instants.sort_by_key(InstantEvent::timestamp);

        let mut open: HashMap<u64, MemoryBlock> = HashMap::new();
        let mut blocks: Vec<MemoryBlock> = Vec::new();
        let mut orphan_frees = Vec::new();

        for (pos, event) in instants.iter().enumerate() {
            match open.remove(&event.address()) {
                Some(mut block) => {
                    if event.bytes() != -block.bytes() {
                        return Err(TraceError::CorruptPairing {
                            address: block.address(),
                            alloc_ts: block.alloc_time(),
                            alloc_bytes: block.bytes(),
                            free_ts: event.timestamp(),
                            free_bytes: event.bytes(),
                        });
                    }
                    block.close(pos, event);
                    blocks.push(block);
                }
                None if event.is_allocation() => {
                    open.insert(event.address(), MemoryBlock::open(pos, event));
                }
                None => {
                    tracing::debug!(
                        address = event.address(),
                        bytes = event.bytes(),
                        ts = event.timestamp(),
                        "free without a matching allocation"
                    );
                    orphan_frees.push(pos);
                }
            }
        }

        let unfreed = open.len();
        blocks.extend(open.into_values());
        blocks.sort_by_key(MemoryBlock::alloc_event);

        if !orphan_frees.is_empty() {
            tracing::warn!(
                count = orphan_frees.len(),
                "memory frees without an allocation inside the trace window"
            );
        }
        tracing::debug!(
            instants = instants.len(),
            blocks = blocks.len(),
            unfreed,
            "paired memory instants"
        );

        Ok(Self {
            by_time: TimeIndex::build(instants.iter().enumerate().map(|(i, e)| (e.timestamp(), i))),
            blocks: TimeIndex::build(blocks.into_iter().map(|b| (b.alloc_time(), b))),
            instants,
            orphan_frees,
        })
    }

    /// Build from raw records, ignoring every category but memory instants.
    pub fn from_records(records: &[RawEvent]) -> Result<Self> {
        let instants = records
            .iter()
            .filter(|r| EventKind::of(r) == Some(EventKind::Instant))
            .map(InstantEvent::from_raw)
            .collect::<Result<Vec<_>>>()?;
        Self::build(instants)
    }

    /// All instants, sorted by timestamp.
    pub fn instants(&self) -> &[InstantEvent] {
        &self.instants
    }

    /// Every block ordered by allocation time, freed or not.
    pub fn blocks(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.blocks.iter().map(|(_, block)| block)
    }

    pub fn freed_blocks(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.blocks().filter(|b| b.is_freed())
    }

    pub fn unfreed_blocks(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.blocks().filter(|b| !b.is_freed())
    }

    /// Blocks allocated at exactly `ts`.
    pub fn blocks_at(&self, ts: i64) -> &[MemoryBlock] {
        self.blocks.at(ts)
    }

    /// Frees whose allocation happened before the trace window.
    pub fn orphan_frees(&self) -> impl Iterator<Item = &InstantEvent> {
        self.orphan_frees.iter().map(|&i| &self.instants[i])
    }

    /// Blocks allocated in `[start, end]`.
    pub fn search_in_range(&self, start: i64, end: i64) -> Vec<&MemoryBlock> {
        self.blocks.range(start, end).collect()
    }

    /// Raw instants in `[start, end]`.
    pub fn search_instants_in_range(&self, start: i64, end: i64) -> Vec<&InstantEvent> {
        self.by_time
            .range(start, end)
            .map(|&i| &self.instants[i])
            .collect()
    }

    /// Largest `Total Allocated` reported by any instant, 0 without instants.
    pub fn peak_allocated(&self) -> i64 {
        self.instants
            .iter()
            .map(InstantEvent::total_allocated)
            .max()
            .unwrap_or(0)
    }
}
