//! Registry persistence: current entries plus their append-only history.
//!
//! The store is the authority for "what is the current state of
//! `(provider, model)`". Both ingestion paths diff against it before
//! committing, so re-applying an observation is always a no-op.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryRegistryStore;
pub use postgres::PostgresRegistryStore;
pub use r#trait::{HistoryLog, RegistryStore, StoreError, Trail};
