//! Semantic diffing of registry entries.
//!
//! Pure and total: no IO, no error paths.

pub mod classifier;
pub mod engine;

pub use classifier::classify;
pub use engine::compute_diff;
