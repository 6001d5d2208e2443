use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator placed between frames of a folded stack line.
pub const FRAME_SEPARATOR: &str = "; ";

/// One line of the folded (collapsed) stack text protocol consumed by
/// flame-graph renderers: `frame1; frame2; ...; frameN <weight>`.
///
/// Frames are ordered root first. The weight is always a positive integer and
/// no frame contains a line break, so a rendered line is always a single line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldedLine {
    frames: Vec<String>,
    weight: u64,
}

impl FoldedLine {
    /// Build a line from root-first frames.
    ///
    /// Returns `None` when there are no frames. A missing or zero weight
    /// becomes 1.
    pub fn new<I, S>(frames: I, weight: Option<u64>) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let frames: Vec<String> = frames
            .into_iter()
            .map(|f| sanitize_frame(f.as_ref()))
            .collect();
        if frames.is_empty() {
            return None;
        }
        Some(Self {
            frames,
            weight: weight.filter(|&w| w > 0).unwrap_or(1),
        })
    }

    /// Parse a rendered line back into frames and weight.
    ///
    /// The weight is the last space-separated token; frames are split on `;`
    /// and trimmed.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let pos = line.rfind(' ')?;
        let weight: u64 = line[pos + 1..].trim().parse().ok()?;
        let stack = line[..pos].trim();
        if stack.is_empty() {
            return None;
        }
        Self::new(stack.split(';').map(str::trim), Some(weight))
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Innermost frame of the stack.
    pub fn leaf(&self) -> Option<&str> {
        self.frames.last().map(String::as_str)
    }
}

impl fmt::Display for FoldedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.frames.join(FRAME_SEPARATOR), self.weight)
    }
}

fn sanitize_frame(frame: &str) -> String {
    if frame.contains(['\n', '\r']) {
        frame.replace(['\n', '\r'], " ")
    } else {
        frame.to_string()
    }
}
