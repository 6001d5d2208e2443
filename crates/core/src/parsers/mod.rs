pub mod pytorch;

pub use pytorch::{RawEvent, parse_trace};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("pytorch: {0}")]
    Pytorch(#[from] pytorch::PytorchParseError),
}
