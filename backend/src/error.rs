//! Error types for the liquidc backend

use liquidc_frontend::il::Span;
use thiserror::Error;

/// A render-time failure. Execution stops, but everything emitted so far
/// is preserved so the caller can append the standard error tail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RenderError {
    pub message: String,
    /// Source range of the failing construct. The VM reads it off the
    /// span table; lowered statements carry their span with them.
    pub location: Option<Span>,
    /// Output accumulated before the failure.
    pub output: String,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            output: String::new(),
        }
    }

    pub fn at(message: impl Into<String>, location: Option<Span>) -> Self {
        Self {
            message: message.into(),
            location,
            output: String::new(),
        }
    }

    pub fn locate(mut self, location: Span) -> Self {
        if self.location.is_none() {
            self.location = Some(location);
        }
        self
    }
}

/// Structured lowering refused the instruction stream; the caller falls
/// back to the stack VM. Never surfaced to template authors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("lowering unsupported: {0}")]
pub struct Unsupported(pub String);

pub fn unsupported(reason: impl Into<String>) -> Unsupported {
    Unsupported(reason.into())
}
