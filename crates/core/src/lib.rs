//! `atlas-core` — registry data model and pure helpers.
//!
//! This crate contains **pure domain** types (no infrastructure concerns): the
//! canonical registry document, structured diffs, history rows, and the
//! canonical hashing used by the dedup cache.

pub mod diff;
pub mod error;
pub mod hashing;
pub mod history;
pub mod json;
pub mod key;
pub mod registry;

pub use diff::{Change, ChangeAction, ChangeKind, Classification, Diff, DiffType, Severity};
pub use error::{DomainError, DomainResult};
pub use hashing::compute_hash;
pub use history::{HistoryEntry, ReplayError};
pub use key::{ModelKey, UNKNOWN_MODEL};
pub use registry::{Conflict, FieldMetadata, ModelFields, RawObservation, RegistryEntryData};
