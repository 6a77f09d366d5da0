//! liquidc - a compiling Liquid template engine
//!
//! Templates compile to a linear stack IL, run through a fixed peephole/
//! dataflow pass schedule, get their temp slots packed by a liveness-
//! driven allocator, and then render either as a lowered native-control-
//! flow program or on the stack VM when lowering declines.
//!
//! # Example
//!
//! ```rust
//! use liquidc::{CompileOptions, Template};
//! use liquidc_runtime::Value;
//!
//! let template = Template::parse("Hello {{ name }}", CompileOptions::default())?;
//! let out = template.render(vec![("name".into(), Value::Str("World".into()))]);
//! assert_eq!(out, "Hello World");
//! # Ok::<(), liquidc::CompileError>(())
//! ```

pub mod error;
pub mod partials;
pub mod pipeline;
pub mod template;

pub use error::{CompileError, Result};
pub use partials::{FileSystemLoader, InMemoryLoader, LoaderError, PartialLoader};
pub use pipeline::{compile, CompilationStats, CompileOptions};
pub use template::Template;

// Re-export the member crates embedders reach into.
pub use backend;
pub use liquidc_frontend as frontend;
pub use liquidc_optimizer as optimizer;
pub use liquidc_runtime as runtime;
