use torchstack_protocol::MemoryBlockRecord;

use crate::model::event::InstantEvent;

/// Lifetime of one allocation: the allocating instant and, if seen, the
/// instant that freed the same address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    address: u64,
    bytes: i64,
    alloc_time: i64,
    free_time: Option<i64>,
    alloc_event: usize,
    free_event: Option<usize>,
}

impl MemoryBlock {
    /// Open a block for the allocation at position `alloc_event` of the
    /// tracker's instant list.
    pub(crate) fn open(alloc_event: usize, event: &InstantEvent) -> Self {
        Self {
            address: event.address(),
            bytes: event.bytes(),
            alloc_time: event.timestamp(),
            free_time: None,
            alloc_event,
            free_event: None,
        }
    }

    pub(crate) fn close(&mut self, free_event: usize, event: &InstantEvent) {
        self.free_time = Some(event.timestamp());
        self.free_event = Some(free_event);
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn bytes(&self) -> i64 {
        self.bytes
    }

    pub fn alloc_time(&self) -> i64 {
        self.alloc_time
    }

    /// `None` when the block was still live at the end of the trace.
    pub fn free_time(&self) -> Option<i64> {
        self.free_time
    }

    pub fn is_freed(&self) -> bool {
        self.free_time.is_some()
    }

    pub fn duration(&self) -> Option<i64> {
        self.free_time.map(|free| free - self.alloc_time)
    }

    /// Position of the allocating instant in the tracker's instant list.
    pub fn alloc_event(&self) -> usize {
        self.alloc_event
    }

    pub fn free_event(&self) -> Option<usize> {
        self.free_event
    }

    pub fn to_record(&self) -> MemoryBlockRecord {
        MemoryBlockRecord {
            address: self.address,
            bytes: self.bytes,
            alloc_time: self.alloc_time,
            free_time: self.free_time,
            duration: self.duration(),
            is_freed: self.is_freed(),
        }
    }
}
