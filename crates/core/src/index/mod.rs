pub mod memory;
pub mod operators;
pub mod stacking;
pub mod time_index;

pub use memory::MemoryTracker;
pub use operators::OperatorIndex;
pub use stacking::{Interval, IntervalForest, stack_intervals};
pub use time_index::TimeIndex;
