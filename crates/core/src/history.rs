//! Append-only audit trail rows and replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diff::{ChangeAction, Diff, DiffType};
use crate::json::values_equal;
use crate::key::ModelKey;
use crate::registry::RegistryEntryData;

/// One committed change for a `(provider, model)` pair.
///
/// Immutable once written. The ordered rows for a key form its full audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Store-assigned, monotonically increasing identifier.
    pub id: i64,
    pub provider: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub diff: Diff,
    /// Full registry document at commit time.
    pub snapshot: RegistryEntryData,
}

impl HistoryEntry {
    pub fn key(&self) -> ModelKey {
        ModelKey::new(self.provider.clone(), self.model.clone())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("history row {id} belongs to {found}, expected {expected}")]
    KeyMismatch {
        id: i64,
        expected: ModelKey,
        found: ModelKey,
    },

    #[error("history row {id} is out of order (previous id {previous})")]
    OutOfOrder { id: i64, previous: i64 },

    #[error("history row {id} is an update with no preceding new_model row")]
    MissingNewModel { id: i64 },

    #[error("history row {id} records a second new_model for an existing entry")]
    UnexpectedNewModel { id: i64 },

    #[error("history row {id}: change to '{field}' does not match the previous snapshot")]
    InconsistentChange { id: i64, field: String },
}

/// Replay an ordered audit trail and return the reconstructed current entry.
///
/// Each `update` row is checked against the snapshot before it: a `modified`
/// change must start from the previous value, an `added` change from nothing.
/// A row that fails this check usually means two writers raced on the same
/// key and the later commit was computed against a stale entry.
pub fn replay(entries: &[HistoryEntry]) -> Result<Option<RegistryEntryData>, ReplayError> {
    let Some(first) = entries.first() else {
        return Ok(None);
    };
    let expected = first.key();

    let mut state: Option<&RegistryEntryData> = None;
    let mut previous_id: Option<i64> = None;

    for entry in entries {
        let found = entry.key();
        if found != expected || entry.snapshot.key() != expected {
            return Err(ReplayError::KeyMismatch {
                id: entry.id,
                expected: expected.clone(),
                found,
            });
        }

        if let Some(previous) = previous_id {
            if entry.id <= previous {
                return Err(ReplayError::OutOfOrder {
                    id: entry.id,
                    previous,
                });
            }
        }

        match (entry.diff.diff_type, state) {
            (DiffType::NewModel, None) => {}
            (DiffType::NewModel, Some(_)) => {
                return Err(ReplayError::UnexpectedNewModel { id: entry.id });
            }
            (DiffType::Update, None) => {
                return Err(ReplayError::MissingNewModel { id: entry.id });
            }
            (DiffType::Update, Some(prev)) => {
                for change in &entry.diff.changes {
                    let before = prev.fields.get(&change.field).map(|m| &m.value);
                    let consistent = match change.action {
                        ChangeAction::Added => before.is_none(),
                        ChangeAction::Modified => match (before, change.old_value.as_ref()) {
                            (Some(b), Some(old)) => values_equal(b, old),
                            _ => false,
                        },
                    };
                    if !consistent {
                        return Err(ReplayError::InconsistentChange {
                            id: entry.id,
                            field: change.field.clone(),
                        });
                    }
                }
            }
        }

        state = Some(&entry.snapshot);
        previous_id = Some(entry.id);
    }

    Ok(state.cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{Change, ChangeKind, Classification, Severity};
    use crate::registry::FieldMetadata;
    use serde_json::{json, Value};

    fn snapshot(pricing: Value) -> RegistryEntryData {
        let mut e = RegistryEntryData::new("acme", "m1");
        e.fields
            .set("pricing", FieldMetadata::new(pricing, "test", Utc::now(), 0.9));
        e
    }

    fn row(id: i64, diff: Diff, snapshot: RegistryEntryData) -> HistoryEntry {
        HistoryEntry {
            id,
            provider: "acme".into(),
            model: "m1".into(),
            timestamp: Utc::now(),
            diff,
            snapshot,
        }
    }

    fn pricing_update(old: Value, new: Value) -> Diff {
        Diff::update(
            "acme",
            "m1",
            vec![Change::modified(
                "pricing",
                old,
                new,
                Classification::new(Severity::Medium, ChangeKind::PricingChange),
            )],
        )
    }

    #[test]
    fn empty_history_replays_to_nothing() {
        assert_eq!(replay(&[]).unwrap(), None);
    }

    #[test]
    fn replay_returns_last_snapshot_of_consistent_trail() {
        let rows = vec![
            row(1, Diff::new_model("acme", "m1"), snapshot(json!({"input": 1}))),
            row(2, pricing_update(json!({"input": 1}), json!({"input": 2})), snapshot(json!({"input": 2}))),
            row(3, pricing_update(json!({"input": 2}), json!({"input": 3})), snapshot(json!({"input": 3}))),
        ];

        let state = replay(&rows).unwrap().unwrap();
        assert_eq!(state.fields.pricing.unwrap().value, json!({"input": 3}));
    }

    #[test]
    fn update_without_new_model_is_rejected() {
        let rows = vec![row(
            1,
            pricing_update(json!({"input": 1}), json!({"input": 2})),
            snapshot(json!({"input": 2})),
        )];
        assert_eq!(replay(&rows), Err(ReplayError::MissingNewModel { id: 1 }));
    }

    #[test]
    fn stale_old_value_is_reported_as_inconsistent() {
        // Second writer diffed against the original entry, not row 2's snapshot.
        let rows = vec![
            row(1, Diff::new_model("acme", "m1"), snapshot(json!({"input": 1}))),
            row(2, pricing_update(json!({"input": 1}), json!({"input": 2})), snapshot(json!({"input": 2}))),
            row(3, pricing_update(json!({"input": 1}), json!({"input": 5})), snapshot(json!({"input": 5}))),
        ];

        assert_eq!(
            replay(&rows),
            Err(ReplayError::InconsistentChange {
                id: 3,
                field: "pricing".into()
            })
        );
    }

    #[test]
    fn added_field_must_not_exist_before() {
        let rows = vec![
            row(1, Diff::new_model("acme", "m1"), snapshot(json!({"input": 1}))),
            row(
                2,
                Diff::update("acme", "m1", vec![Change::added("pricing", json!({"input": 2}))]),
                snapshot(json!({"input": 2})),
            ),
        ];
        assert!(matches!(replay(&rows), Err(ReplayError::InconsistentChange { id: 2, .. })));
    }

    #[test]
    fn mixed_keys_and_ordering_are_rejected() {
        let mut other = row(2, Diff::update("acme", "m2", vec![]), snapshot(json!({})));
        other.model = "m2".into();
        let rows = vec![row(1, Diff::new_model("acme", "m1"), snapshot(json!({}))), other];
        assert!(matches!(replay(&rows), Err(ReplayError::KeyMismatch { id: 2, .. })));

        let rows = vec![
            row(5, Diff::new_model("acme", "m1"), snapshot(json!({}))),
            row(4, Diff::update("acme", "m1", vec![]), snapshot(json!({}))),
        ];
        assert_eq!(replay(&rows), Err(ReplayError::OutOfOrder { id: 4, previous: 5 }));
    }
}
