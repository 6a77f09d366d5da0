//! liquidc frontend - lexer, parser, and the template IL
//!
//! The frontend owns the instruction set: the parser compiles template
//! source straight into a linear stack IL with a span per instruction,
//! and [`il::link`] resolves label references once downstream passes have
//! finished rearranging code.

pub mod error;
pub mod il;
pub mod lexer;
pub mod parser;

pub use error::{LinkError, ParseError, Result};
pub use il::{
    link, CommandOp, CompareOp, CompiledPartial, Const, CycleValue, Il, Instruction,
    InterruptKind, PartialArg, PartialCall, Span,
};
pub use parser::parse;
