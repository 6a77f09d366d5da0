//! liquidc backend - stack VM and structured lowering
//!
//! Two execution paths over the same linked IL. The [`vm`] interprets it
//! directly and accepts every program; [`lower`] reconstructs native
//! control flow for the subset it recognizes. Rendering prefers the
//! lowered [`Program`] and falls back to the VM; both paths must produce
//! identical output.

pub mod error;
pub mod forloop;
pub mod lower;
pub mod vm;

pub use error::{RenderError, Unsupported};
pub use lower::{lower, CycleKey, Expr, Program, Stmt};
pub use vm::{execute, NoPartials, PartialResolver};
