//! Optimization passes
//!
//! Each module owns one family of rewrites; the ordering that makes them
//! sound lives in [`crate::Optimizer::optimize`].

pub mod capture;
pub mod cleanup;
pub mod const_fold;
pub mod paths;
pub mod writes;

pub use capture::CaptureFolder;
pub use cleanup::Cleanup;
pub use const_fold::{ConstFolder, FOLDABLE_FILTERS};
pub use paths::PathCollapser;
pub use writes::WriteMerger;
