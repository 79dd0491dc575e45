use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;

use atlas_core::{Diff, HistoryEntry, ModelKey, RegistryEntryData};

use super::r#trait::{HistoryLog, RegistryStore, StoreError, Trail, check_commit};

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<ModelKey, RegistryEntryData>,
    history: Vec<HistoryEntry>,
}

/// In-memory registry store.
///
/// Intended for tests/dev. `commit` holds the write lock for the upsert and the
/// history append, which gives the same all-or-nothing visibility as a
/// database transaction.
#[derive(Debug, Default)]
pub struct InMemoryRegistryStore {
    inner: RwLock<Inner>,
    fail_commits: AtomicUsize,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with [`StoreError::Unavailable`] without writing anything.
    pub fn fail_next_commits(&self, n: usize) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }

    /// Total number of history rows across all keys.
    pub fn history_len(&self) -> usize {
        self.inner.read().map(|inner| inner.history.len()).unwrap_or(0)
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl RegistryStore for InMemoryRegistryStore {
    fn load(&self, key: &ModelKey) -> Result<Option<RegistryEntryData>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(inner.entries.get(key).cloned())
    }

    fn commit(&self, entry: &RegistryEntryData, diff: &Diff) -> Result<HistoryEntry, StoreError> {
        check_commit(entry, diff)?;
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        let row = HistoryEntry {
            id: inner.history.len() as i64 + 1,
            provider: entry.provider.clone(),
            model: entry.model.clone(),
            timestamp: Utc::now(),
            diff: diff.clone(),
            snapshot: entry.clone(),
        };

        inner.entries.insert(entry.key(), entry.clone());
        inner.history.push(row.clone());
        Ok(row)
    }

    fn list(&self) -> Result<Vec<RegistryEntryData>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(inner.entries.values().cloned().collect())
    }
}

impl Inner {
    fn history_of(&self, key: &ModelKey) -> Vec<HistoryEntry> {
        self.history
            .iter()
            .filter(|h| h.provider == key.provider && h.model == key.model)
            .cloned()
            .collect()
    }
}

impl HistoryLog for InMemoryRegistryStore {
    fn history(&self, key: &ModelKey) -> Result<Vec<HistoryEntry>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(inner.history_of(key))
    }

    fn trail(&self, key: &ModelKey) -> Result<Trail, StoreError> {
        // One read guard: commits take the write lock for entry and history together.
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(Trail {
            history: inner.history_of(key),
            current: inner.entries.get(key).cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::history::replay;
    use atlas_core::{Change, ChangeKind, Classification, FieldMetadata, Severity};
    use serde_json::json;

    fn entry(model: &str, context_window: i64) -> RegistryEntryData {
        let mut e = RegistryEntryData::new("acme", model);
        e.fields.set(
            "context_window",
            FieldMetadata::new(json!(context_window), "test", Utc::now(), 0.9),
        );
        e
    }

    #[test]
    fn commit_upserts_entry_and_appends_history() {
        let store = InMemoryRegistryStore::new();
        let first = entry("m1", 8192);
        let row = store.commit(&first, &Diff::new_model("acme", "m1")).unwrap();
        assert_eq!(row.id, 1);
        assert_eq!(row.snapshot, first);

        let second = entry("m1", 4096);
        let diff = Diff::update("acme", "m1", vec![Change::added("context_window", json!(4096))]);
        store.commit(&second, &diff).unwrap();

        assert_eq!(store.load(&first.key()).unwrap(), Some(second));
        let history = store.history(&first.key()).unwrap();
        assert_eq!(history.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn history_is_scoped_to_key() {
        let store = InMemoryRegistryStore::new();
        store.commit(&entry("m1", 1), &Diff::new_model("acme", "m1")).unwrap();
        store.commit(&entry("m2", 1), &Diff::new_model("acme", "m2")).unwrap();

        let h = store.history(&ModelKey::new("acme", "m2")).unwrap();
        assert_eq!(h.len(), 1);
        assert_eq!(h[0].model, "m2");
        assert!(replay(&h).unwrap().is_some());
    }

    #[test]
    fn injected_failure_writes_nothing() {
        let store = InMemoryRegistryStore::new();
        store.fail_next_commits(1);

        let e = entry("m1", 1);
        assert!(matches!(
            store.commit(&e, &Diff::new_model("acme", "m1")),
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.load(&e.key()).unwrap(), None);
        assert_eq!(store.history_len(), 0);

        store.commit(&e, &Diff::new_model("acme", "m1")).unwrap();
        assert_eq!(store.history_len(), 1);
    }

    #[test]
    fn diff_for_another_key_is_rejected() {
        let store = InMemoryRegistryStore::new();
        let err = store
            .commit(&entry("m1", 1), &Diff::new_model("acme", "other"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn field_without_sources_is_rejected() {
        let store = InMemoryRegistryStore::new();
        let mut e = entry("m1", 1);
        let mut meta = FieldMetadata::new(json!({"input": 1}), "test", Utc::now(), 0.9);
        meta.sources.clear();
        e.fields.set("pricing", meta);

        let err = store.commit(&e, &Diff::new_model("acme", "m1")).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert_eq!(store.history_len(), 0);
    }

    #[test]
    fn trail_pairs_history_with_current_entry() {
        let store = InMemoryRegistryStore::new();
        let key = ModelKey::new("acme", "m1");
        let empty = store.trail(&key).unwrap();
        assert!(empty.history.is_empty());
        assert_eq!(empty.current, None);

        store.commit(&entry("m1", 8192), &Diff::new_model("acme", "m1")).unwrap();
        let shrunk = entry("m1", 4096);
        let diff = Diff::update(
            "acme",
            "m1",
            vec![Change::modified(
                "context_window",
                json!(8192),
                json!(4096),
                Classification::new(Severity::High, ChangeKind::LimitChange).breaking(),
            )],
        );
        store.commit(&shrunk, &diff).unwrap();

        let trail = store.trail(&key).unwrap();
        assert_eq!(trail.history.len(), 2);
        assert_eq!(trail.current, Some(shrunk));
        assert!(trail.replays_to_current().unwrap());
    }

    #[test]
    fn trail_detects_current_entry_ahead_of_history() {
        let store = InMemoryRegistryStore::new();
        let first = entry("m1", 8192);
        store.commit(&first, &Diff::new_model("acme", "m1")).unwrap();

        let mut trail = store.trail(&first.key()).unwrap();
        trail.current = Some(entry("m1", 1));
        assert!(!trail.replays_to_current().unwrap());
    }

    #[test]
    fn list_is_ordered_by_key() {
        let store = InMemoryRegistryStore::new();
        store.commit(&entry("b", 1), &Diff::new_model("acme", "b")).unwrap();
        store.commit(&entry("a", 1), &Diff::new_model("acme", "a")).unwrap();

        let models: Vec<String> = store.list().unwrap().into_iter().map(|e| e.model).collect();
        assert_eq!(models, vec!["a", "b"]);
    }
}
