//! Hash-based change tracking (the dedup cache).
//!
//! Remembers the canonical hash of the last raw observation seen per
//! `provider:model`. It is advisory only: the registry store remains the
//! source of truth and the pipeline always diffs against it. Losing the
//! tracker's contents costs nothing but cache hits.

use std::sync::Arc;

use thiserror::Error;

use atlas_core::ModelKey;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryStateTracker;
#[cfg(feature = "redis")]
pub use self::redis::RedisStateTracker;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state backend error: {0}")]
    Backend(String),

    #[error("state lock poisoned")]
    Poisoned,
}

pub trait StateTracker: Send + Sync {
    /// True when no hash is stored for `key` or the stored hash differs.
    fn should_process(&self, key: &ModelKey, hash: &str) -> Result<bool, StateError>;

    /// Store `hash` as the latest for `key`, unconditionally.
    fn update_state(&self, key: &ModelKey, hash: &str) -> Result<(), StateError>;
}

impl<T> StateTracker for Arc<T>
where
    T: StateTracker + ?Sized,
{
    fn should_process(&self, key: &ModelKey, hash: &str) -> Result<bool, StateError> {
        (**self).should_process(key, hash)
    }

    fn update_state(&self, key: &ModelKey, hash: &str) -> Result<(), StateError> {
        (**self).update_state(key, hash)
    }
}
