pub mod call_tree;
pub mod event;
pub mod memory;
pub mod session;

pub use call_tree::{BackwardStack, CallTree, CallTreeNode, NodeId};
pub use event::{Dim, Event, EventHeader, EventKind, InstantEvent, OperatorEvent, StackEvent};
pub use memory::MemoryBlock;
pub use session::TraceSession;
