pub mod stack_leaf;

pub use stack_leaf::StackLeaf;
