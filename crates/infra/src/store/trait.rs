use std::sync::Arc;

use thiserror::Error;

use atlas_core::history::{ReplayError, replay};
use atlas_core::{Diff, HistoryEntry, ModelKey, RegistryEntryData};

/// Registry store operation error.
///
/// These are infrastructure errors. A failed `commit` leaves neither the
/// entry nor the history row written.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached (pool closed, connection refused, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The write conflicts with stored data or with itself (e.g. diff for another key).
    #[error("store conflict: {0}")]
    Conflict(String),

    /// A stored or outgoing document could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The entry breaks a registry invariant and was not written.
    #[error("invalid entry: {0}")]
    Invalid(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Current registry entries keyed by `(provider, model)`.
///
/// ## Commit semantics
///
/// `commit()` upserts the full entry (replace, not merge) and appends one
/// [`HistoryEntry`] carrying the diff and a snapshot of the entry, as one
/// atomic unit. Either both become visible or neither does.
///
/// There is no optimistic version check: two writers committing the same key
/// concurrently both succeed, and the later commit wins. The history trail
/// keeps both rows, which [`atlas_core::history::replay`] flags.
pub trait RegistryStore: Send + Sync {
    /// Load the current entry, if the key has ever been committed.
    fn load(&self, key: &ModelKey) -> Result<Option<RegistryEntryData>, StoreError>;

    /// Atomically replace the entry and append its history row.
    fn commit(&self, entry: &RegistryEntryData, diff: &Diff) -> Result<HistoryEntry, StoreError>;

    /// Every current entry, ordered by key.
    fn list(&self) -> Result<Vec<RegistryEntryData>, StoreError>;
}

/// One key's history rows and current entry, read from the same snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Trail {
    pub history: Vec<HistoryEntry>,
    pub current: Option<RegistryEntryData>,
}

impl Trail {
    /// True when replaying `history` reproduces `current`.
    pub fn replays_to_current(&self) -> Result<bool, ReplayError> {
        Ok(replay(&self.history)? == self.current)
    }
}

/// Read access to the append-only audit trail.
pub trait HistoryLog: Send + Sync {
    /// All history rows for `key`, oldest first.
    fn history(&self, key: &ModelKey) -> Result<Vec<HistoryEntry>, StoreError>;

    /// History and current entry for `key` as of a single point in time.
    /// A commit landing concurrently is either fully visible or not at all.
    fn trail(&self, key: &ModelKey) -> Result<Trail, StoreError>;
}

impl<S> RegistryStore for Arc<S>
where
    S: RegistryStore + ?Sized,
{
    fn load(&self, key: &ModelKey) -> Result<Option<RegistryEntryData>, StoreError> {
        (**self).load(key)
    }

    fn commit(&self, entry: &RegistryEntryData, diff: &Diff) -> Result<HistoryEntry, StoreError> {
        (**self).commit(entry, diff)
    }

    fn list(&self) -> Result<Vec<RegistryEntryData>, StoreError> {
        (**self).list()
    }
}

impl<S> HistoryLog for Arc<S>
where
    S: HistoryLog + ?Sized,
{
    fn history(&self, key: &ModelKey) -> Result<Vec<HistoryEntry>, StoreError> {
        (**self).history(key)
    }

    fn trail(&self, key: &ModelKey) -> Result<Trail, StoreError> {
        (**self).trail(key)
    }
}

/// Reject an entry that fails validation, or a diff that does not describe it.
pub(crate) fn check_commit(entry: &RegistryEntryData, diff: &Diff) -> Result<(), StoreError> {
    entry
        .validate()
        .map_err(|e| StoreError::Invalid(format!("{}: {e}", entry.key())))?;
    if diff.provider != entry.provider || diff.model != entry.model {
        return Err(StoreError::Conflict(format!(
            "diff for {}:{} cannot be committed with entry {}",
            diff.provider,
            diff.model,
            entry.key()
        )));
    }
    Ok(())
}
