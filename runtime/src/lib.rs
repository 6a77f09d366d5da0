//! liquidc runtime - values, scope, and filters
//!
//! Everything the compiled template touches at render time lives here.
//! The optimizer links against this crate too: constant filter folding
//! runs the same [`filters::FilterRegistry`] the VM uses, so a fold can
//! never disagree with the render-time result.

pub mod filters;
pub mod scope;
pub mod value;

pub use filters::{FilterError, FilterRegistry};
pub use scope::Scope;
pub use value::{Value, ValueError};
