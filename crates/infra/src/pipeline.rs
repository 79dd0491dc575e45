//! Shared ingestion step used by both the stream consumer and the orchestrator.
//!
//! ```text
//! raw observation
//!   ↓
//! 1. Normalize (sentinel identity is logged as a data-quality event)
//!   ↓
//! 2. Hash the raw item and consult the state tracker (advisory only)
//!   ↓
//! 3. Load the current entry from the registry store
//!   ↓
//! 4. Diff current → normalized
//!   ↓
//! 5. If material: commit entry + history row atomically
//!   ↓
//! 6. Record the hash in the state tracker (best-effort)
//! ```
//!
//! The diff against the store is the only gate on writes, which makes the step
//! idempotent: processing the same observation twice commits at most once.

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use atlas_core::{Diff, HistoryEntry, ModelKey, RawObservation, compute_hash};
use atlas_diff::compute_diff;
use atlas_ingest::Normalizer;

use crate::state::StateTracker;
use crate::store::{RegistryStore, StoreError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to load {key}: {source}")]
    Load {
        key: ModelKey,
        #[source]
        source: StoreError,
    },

    #[error("failed to commit {key}: {source}")]
    Commit {
        key: ModelKey,
        #[source]
        source: StoreError,
    },
}

/// Result of running one observation through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub key: ModelKey,
    pub diff: Diff,
    /// The history row written, when the diff was material.
    pub history: Option<HistoryEntry>,
    /// The tracker already held this exact raw hash.
    pub cache_hit: bool,
}

impl IngestOutcome {
    pub fn committed(&self) -> bool {
        self.history.is_some()
    }
}

/// Normalize → diff → persist, over an injected store and state tracker.
#[derive(Debug)]
pub struct IngestPipeline<S, T> {
    store: S,
    tracker: T,
    normalizer: Normalizer,
}

impl<S, T> IngestPipeline<S, T>
where
    S: RegistryStore,
    T: StateTracker,
{
    pub fn new(store: S, tracker: T) -> Self {
        Self {
            store,
            tracker,
            normalizer: Normalizer::default(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Run one raw observation for `provider` through the pipeline.
    ///
    /// Store errors are returned and nothing is written; tracker errors are
    /// logged and never fail the item.
    pub fn process(&self, raw: &RawObservation, provider: &str) -> Result<IngestOutcome, PipelineError> {
        let entry = self.normalizer.normalize(raw, provider);
        let key = entry.key();

        if entry.has_sentinel_identity() {
            warn!(
                data_quality = "missing_model_id",
                provider = %key.provider,
                model = %key.model,
                "observation has no model_name or id; using sentinel identity"
            );
        }

        let hash = compute_hash(&JsonValue::Object(raw.clone()));
        let cache_hit = match self.tracker.should_process(&key, &hash) {
            Ok(should_process) => !should_process,
            Err(e) => {
                warn!(key = %key, error = %e, "state tracker lookup failed");
                false
            }
        };

        let current = self
            .store
            .load(&key)
            .map_err(|source| PipelineError::Load {
                key: key.clone(),
                source,
            })?;

        let diff = compute_diff(current.as_ref(), &entry);

        let history = if diff.is_material() {
            let row = self
                .store
                .commit(&entry, &diff)
                .map_err(|source| PipelineError::Commit {
                    key: key.clone(),
                    source,
                })?;

            info!(
                provider = %key.provider,
                model = %key.model,
                diff_type = ?diff.diff_type,
                changes = diff.changes.len(),
                severity = ?diff.max_severity(),
                breaking = diff.has_breaking_change(),
                history_id = row.id,
                cache_hit,
                "registry entry updated"
            );
            Some(row)
        } else {
            debug!(provider = %key.provider, model = %key.model, cache_hit, "no material change");
            None
        };

        if let Err(e) = self.tracker.update_state(&key, &hash) {
            warn!(key = %key, error = %e, "state tracker update failed");
        }

        Ok(IngestOutcome {
            key,
            diff,
            history,
            cache_hit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{InMemoryStateTracker, StateError};
    use crate::store::{HistoryLog, InMemoryRegistryStore};
    use atlas_core::{ChangeKind, DiffType, Severity, UNKNOWN_MODEL};
    use serde_json::json;
    use std::sync::Arc;

    fn raw(v: JsonValue) -> RawObservation {
        match v {
            JsonValue::Object(m) => m,
            _ => unreachable!(),
        }
    }

    fn pipeline() -> IngestPipeline<Arc<InMemoryRegistryStore>, Arc<InMemoryStateTracker>> {
        IngestPipeline::new(
            Arc::new(InMemoryRegistryStore::new()),
            Arc::new(InMemoryStateTracker::new()),
        )
    }

    #[test]
    fn first_observation_commits_new_model() {
        let p = pipeline();
        let out = p
            .process(&raw(json!({"model_name": "m1", "pricing": {"input": 1}})), "acme")
            .unwrap();

        assert_eq!(out.diff.diff_type, DiffType::NewModel);
        assert!(out.committed());
        assert!(!out.cache_hit);
        assert_eq!(p.store().history(&out.key).unwrap().len(), 1);
    }

    #[test]
    fn repeated_observation_is_a_cache_hit_and_commits_nothing() {
        let p = pipeline();
        let item = raw(json!({"model_name": "m1", "pricing": {"input": 1}}));
        p.process(&item, "acme").unwrap();

        let again = p.process(&item, "acme").unwrap();
        assert!(again.cache_hit);
        assert!(!again.committed());
        assert_eq!(again.diff.diff_type, DiffType::Update);
        assert!(again.diff.changes.is_empty());
        assert_eq!(p.store().history_len(), 1);
    }

    #[test]
    fn cold_tracker_still_dedups_against_store() {
        let store = Arc::new(InMemoryRegistryStore::new());
        let item = raw(json!({"model_name": "m1", "context_window": 8192}));

        IngestPipeline::new(store.clone(), InMemoryStateTracker::new())
            .process(&item, "acme")
            .unwrap();
        let out = IngestPipeline::new(store.clone(), InMemoryStateTracker::new())
            .process(&item, "acme")
            .unwrap();

        assert!(!out.cache_hit);
        assert!(!out.committed());
        assert_eq!(store.history_len(), 1);
    }

    #[test]
    fn context_window_shrink_is_recorded_as_breaking() {
        let p = pipeline();
        p.process(&raw(json!({"id": "m1", "context_window": 128000})), "acme").unwrap();
        let out = p.process(&raw(json!({"id": "m1", "context_window": 32000})), "acme").unwrap();

        let history = out.history.unwrap();
        assert_eq!(history.id, 2);
        assert_eq!(history.diff.changes[0].kind, ChangeKind::LimitChange);
        assert_eq!(history.diff.changes[0].severity, Severity::High);
        assert!(history.diff.has_breaking_change());
        assert_eq!(history.snapshot.fields.context_window.unwrap().value, json!(32000));
    }

    #[test]
    fn unidentified_item_lands_on_sentinel_key() {
        let out = pipeline().process(&raw(json!({"pricing": {}})), "acme").unwrap();
        assert_eq!(out.key, ModelKey::new("acme", UNKNOWN_MODEL));
        assert!(out.committed());
    }

    #[test]
    fn commit_failure_is_returned_and_tracker_untouched() {
        let p = pipeline();
        p.store().fail_next_commits(1);

        let item = raw(json!({"id": "m1", "pricing": {"input": 1}}));
        let err = p.process(&item, "acme").unwrap_err();
        assert!(matches!(err, PipelineError::Commit { .. }));
        assert_eq!(p.tracker().last_hash(&ModelKey::new("acme", "m1")), None);

        assert!(p.process(&item, "acme").unwrap().committed());
    }

    struct BrokenTracker;

    impl StateTracker for BrokenTracker {
        fn should_process(&self, _: &ModelKey, _: &str) -> Result<bool, StateError> {
            Err(StateError::Backend("down".into()))
        }

        fn update_state(&self, _: &ModelKey, _: &str) -> Result<(), StateError> {
            Err(StateError::Backend("down".into()))
        }
    }

    #[test]
    fn tracker_errors_never_fail_the_item() {
        let p = IngestPipeline::new(InMemoryRegistryStore::new(), BrokenTracker);
        let out = p.process(&raw(json!({"id": "m1", "pricing": {}})), "acme").unwrap();
        assert!(out.committed());
        assert!(!out.cache_hit);
    }
}
