//! Classification of the accumulated response buffer.
//!
//! The assistant service either streams a JSON envelope `{"output": "..."}`
//! or plain prose, and the two cannot be told apart until enough bytes have
//! arrived. The whole buffer is therefore reclassified on every fragment.

use serde_json::Value;

/// Field of the JSON envelope that carries the user-visible text.
pub const OUTPUT_FIELD: &str = "output";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The buffer is a complete JSON value with a string `output` field.
    Structured,
    /// Anything else, shown as text.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: FrameKind,
    pub display: String,
}

/// Classifies the full buffer received so far.
pub fn classify(buffer: &str) -> Classification {
    if let Ok(value) = serde_json::from_str::<Value>(buffer) {
        if let Some(output) = value.get(OUTPUT_FIELD).and_then(Value::as_str) {
            return Classification {
                kind: FrameKind::Structured,
                display: output.trim().to_string(),
            };
        }
    }

    Classification {
        kind: FrameKind::Raw,
        display: buffer.trim().to_string(),
    }
}

/// Per-round classification state.
///
/// Once a round has produced a structured display string, a later raw
/// classification carries no new information and the structured string is
/// kept. Every other transition replaces the display string.
#[derive(Debug, Default)]
pub struct FrameTracker {
    last: Option<Classification>,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reclassifies `buffer` and returns the display string if it changed.
    pub fn observe(&mut self, buffer: &str) -> Option<&str> {
        let next = classify(buffer);

        if let Some(last) = &self.last {
            if last.kind == FrameKind::Structured && next.kind == FrameKind::Raw {
                return None;
            }
            if *last == next {
                return None;
            }
        }

        self.last = Some(next);
        self.last.as_ref().map(|c| c.display.as_str())
    }

    /// The best display string seen so far.
    pub fn display(&self) -> Option<&str> {
        self.last.as_ref().map(|c| c.display.as_str())
    }

    pub fn kind(&self) -> Option<FrameKind> {
        self.last.as_ref().map(|c| c.kind)
    }
}
