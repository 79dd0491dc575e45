//! Redis-backed state tracker.
//!
//! One string key per model: `{prefix}:{provider}:{model}:last_hash`
//! (default prefix `state`). No expiry; entries are overwritten in place.

use std::sync::Arc;

use redis::Commands;
use tracing::instrument;

use atlas_core::ModelKey;

use super::{StateError, StateTracker};

/// Default key prefix.
pub const DEFAULT_STATE_PREFIX: &str = "state";

#[derive(Debug, Clone)]
pub struct RedisStateTracker {
    client: Arc<redis::Client>,
    prefix: String,
}

impl RedisStateTracker {
    pub fn new(redis_url: impl AsRef<str>, prefix: Option<String>) -> Result<Self, StateError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StateError::Backend(format!("invalid redis url: {e}")))?;
        Ok(Self::from_client(Arc::new(client), prefix))
    }

    /// Share an existing client (e.g. with the ingestion stream).
    pub fn from_client(client: Arc<redis::Client>, prefix: Option<String>) -> Self {
        Self {
            client,
            prefix: prefix.unwrap_or_else(|| DEFAULT_STATE_PREFIX.to_string()),
        }
    }

    pub fn state_key(&self, key: &ModelKey) -> String {
        format!("{}:{}:last_hash", self.prefix, key)
    }

    fn connection(&self) -> Result<redis::Connection, StateError> {
        self.client
            .get_connection()
            .map_err(|e| StateError::Backend(format!("connection failed: {e}")))
    }
}

impl StateTracker for RedisStateTracker {
    #[instrument(skip(self), fields(key = %key), err)]
    fn should_process(&self, key: &ModelKey, hash: &str) -> Result<bool, StateError> {
        let mut conn = self.connection()?;
        let stored: Option<String> = conn
            .get(self.state_key(key))
            .map_err(|e| StateError::Backend(format!("GET failed: {e}")))?;
        Ok(stored.as_deref() != Some(hash))
    }

    #[instrument(skip(self), fields(key = %key), err)]
    fn update_state(&self, key: &ModelKey, hash: &str) -> Result<(), StateError> {
        let mut conn = self.connection()?;
        conn.set::<_, _, ()>(self.state_key(key), hash)
            .map_err(|e| StateError::Backend(format!("SET failed: {e}")))
    }
}
