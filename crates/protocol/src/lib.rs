pub mod folded;
pub mod records;

pub use folded::FoldedLine;
pub use records::{LeafRecord, MemoryBlockRecord};
