use std::collections::HashMap;
use std::sync::RwLock;

use atlas_core::ModelKey;

use super::{StateError, StateTracker};

/// In-memory state tracker (tests/dev). Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryStateTracker {
    hashes: RwLock<HashMap<ModelKey, String>>,
}

impl InMemoryStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_hash(&self, key: &ModelKey) -> Option<String> {
        self.hashes.read().ok()?.get(key).cloned()
    }
}

impl StateTracker for InMemoryStateTracker {
    fn should_process(&self, key: &ModelKey, hash: &str) -> Result<bool, StateError> {
        let hashes = self.hashes.read().map_err(|_| StateError::Poisoned)?;
        Ok(hashes.get(key).map(String::as_str) != Some(hash))
    }

    fn update_state(&self, key: &ModelKey, hash: &str) -> Result<(), StateError> {
        let mut hashes = self.hashes.write().map_err(|_| StateError::Poisoned)?;
        hashes.insert(key.clone(), hash.to_string());
        Ok(())
    }
}
