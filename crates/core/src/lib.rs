//! Reconstruction of call stacks, operator nesting and memory lifetimes from
//! PyTorch profiler traces.

pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod parsers;
pub mod views;

pub use config::{AnalysisConfig, ExportOptions, SchemaPolicy};
pub use error::{Result, TraceError};
pub use model::TraceSession;
