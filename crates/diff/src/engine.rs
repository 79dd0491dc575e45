//! Forward-looking diff between a stored entry and a freshly normalized one.

use atlas_core::json::values_equal;
use atlas_core::{Change, Diff, RegistryEntryData};

use crate::classifier::classify;

/// Compute the diff from `old` (the persisted entry, if any) to `new`.
///
/// - No `old`: a `new_model` diff with no changes.
/// - Otherwise an `update` diff listing every field of `new` that is absent
///   from `old` (`added`) or whose value differs (`modified`). Fields only
///   present in `old` are not reported.
///
/// Callers persist when [`Diff::is_material`] holds.
pub fn compute_diff(old: Option<&RegistryEntryData>, new: &RegistryEntryData) -> Diff {
    let Some(old) = old else {
        return Diff::new_model(new.provider.clone(), new.model.clone());
    };

    let mut changes = Vec::new();
    for (name, new_meta) in new.fields.iter() {
        match old.fields.get(name) {
            None => changes.push(Change::added(name, new_meta.value.clone())),
            Some(old_meta) if !values_equal(&old_meta.value, &new_meta.value) => {
                let classification = classify(name, &old_meta.value, &new_meta.value);
                changes.push(Change::modified(
                    name,
                    old_meta.value.clone(),
                    new_meta.value.clone(),
                    classification,
                ));
            }
            Some(_) => {}
        }
    }

    Diff::update(new.provider.clone(), new.model.clone(), changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::{ChangeAction, ChangeKind, DiffType, FieldMetadata, Severity};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn entry(fields: &[(&str, Value)]) -> RegistryEntryData {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut e = RegistryEntryData::new("acme", "m1");
        for (name, value) in fields {
            e.fields
                .set(name, FieldMetadata::new(value.clone(), "test", at, 0.9));
        }
        e
    }

    #[test]
    fn no_previous_entry_is_a_new_model() {
        let new = entry(&[("pricing", json!({"input": 1}))]);
        let diff = compute_diff(None, &new);
        assert_eq!(diff, Diff::new_model("acme", "m1"));
        assert!(diff.changes.is_empty());
    }

    #[test]
    fn pricing_only_change_yields_one_medium_pricing_change() {
        let old = entry(&[("pricing", json!({"input": 1, "output": 2})), ("context_window", json!(8192))]);
        let new = entry(&[("pricing", json!({"input": 1, "output": 3})), ("context_window", json!(8192))]);

        let diff = compute_diff(Some(&old), &new);
        assert_eq!(diff.diff_type, DiffType::Update);
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].kind, ChangeKind::PricingChange);
        assert_eq!(diff.changes[0].severity, Severity::Medium);
        assert_eq!(diff.changes[0].old_value, Some(json!({"input": 1, "output": 2})));
    }

    #[test]
    fn context_window_shrink_is_high_and_breaking() {
        let old = entry(&[("context_window", json!(128000))]);
        let new = entry(&[("context_window", json!(32000))]);

        let diff = compute_diff(Some(&old), &new);
        let v = serde_json::to_value(&diff.changes[0]).unwrap();
        assert_eq!(
            v,
            json!({
                "field": "context_window",
                "action": "modified",
                "old_value": 128000,
                "new_value": 32000,
                "severity": "high",
                "kind": "limit_change",
                "breaking": true
            })
        );
    }

    #[test]
    fn context_window_growth_is_low_without_breaking_flag() {
        let old = entry(&[("context_window", json!(32000))]);
        let new = entry(&[("context_window", json!(128000))]);

        let change = &compute_diff(Some(&old), &new).changes[0];
        assert_eq!(change.severity, Severity::Low);
        assert_eq!(change.breaking, None);
    }

    #[test]
    fn new_field_is_added_with_low_severity() {
        let old = entry(&[("pricing", json!({"input": 1}))]);
        let new = entry(&[("pricing", json!({"input": 1})), ("context_window", json!(8192))]);

        let diff = compute_diff(Some(&old), &new);
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].action, ChangeAction::Added);
        assert_eq!(diff.changes[0].severity, Severity::Low);
        assert_eq!(diff.changes[0].new_value, Some(json!(8192)));
    }

    #[test]
    fn fields_only_in_old_are_not_reported() {
        let old = entry(&[("pricing", json!({"input": 1})), ("context_window", json!(8192))]);
        let new = entry(&[("pricing", json!({"input": 1}))]);

        let diff = compute_diff(Some(&old), &new);
        assert_eq!(diff.diff_type, DiffType::Update);
        assert!(diff.changes.is_empty());
        assert!(!diff.is_material());
    }

    #[test]
    fn provenance_only_differences_are_not_changes() {
        let old = entry(&[("pricing", json!({"input": 1}))]);
        let mut new = entry(&[("pricing", json!({"input": 1}))]);
        let meta = new.fields.pricing.as_mut().unwrap();
        meta.last_verified = Utc::now();
        meta.sources = vec!["other".into()];
        meta.confidence = 0.1;

        assert!(compute_diff(Some(&old), &new).changes.is_empty());
    }

    #[test]
    fn numeric_representation_does_not_count_as_change() {
        let old = entry(&[("context_window", json!(8192))]);
        let new = entry(&[("context_window", json!(8192.0))]);
        assert!(compute_diff(Some(&old), &new).changes.is_empty());
    }

    #[test]
    fn extra_fields_are_diffed_after_known_fields() {
        let old = entry(&[("modalities", json!(["text"]))]);
        let new = entry(&[("modalities", json!(["text", "image"])), ("pricing", json!({"input": 1}))]);

        let fields: Vec<String> = compute_diff(Some(&old), &new)
            .changes
            .into_iter()
            .map(|c| c.field)
            .collect();
        assert_eq!(fields, vec!["pricing", "modalities"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: the same (old, new) pair always produces the same diff,
        /// regardless of the order fields were inserted in.
        #[test]
        fn diff_is_deterministic(
            old_vals in prop::collection::btree_map("[a-e]", 0i64..5, 0..5),
            new_vals in prop::collection::btree_map("[a-e]", 0i64..5, 0..5),
        ) {
            let old_fields: Vec<(&str, Value)> =
                old_vals.iter().map(|(k, v)| (k.as_str(), json!(v))).collect();
            let new_fields: Vec<(&str, Value)> =
                new_vals.iter().map(|(k, v)| (k.as_str(), json!(v))).collect();
            let mut new_reversed = new_fields.clone();
            new_reversed.reverse();

            let old = entry(&old_fields);
            let a = compute_diff(Some(&old), &entry(&new_fields));
            let b = compute_diff(Some(&old), &entry(&new_reversed));
            prop_assert_eq!(a, b);
        }

        /// Property: diffing an entry against itself never yields changes.
        #[test]
        fn self_diff_is_empty(vals in prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..8)) {
            let fields: Vec<(&str, Value)> = vals.iter().map(|(k, v)| (k.as_str(), json!(v))).collect();
            let e = entry(&fields);
            prop_assert!(compute_diff(Some(&e), &e).changes.is_empty());
        }
    }
}
