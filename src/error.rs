//! Error types for the liquidc compiler

use liquidc_frontend::{LinkError, ParseError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

/// Compilation error types. Render-time failures never surface here;
/// they become the `Liquid error` tail in the output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Template (or inlined partial) failed to parse.
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// Label resolution failed; indicates a compiler bug.
    #[error("{0}")]
    Link(#[from] LinkError),
}
