//! Raw observation → canonical registry entry.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use atlas_core::{FieldMetadata, ModelFields, RawObservation, RegistryEntryData, UNKNOWN_MODEL};

/// Confidence assigned to every freshly observed field.
pub const DEFAULT_CONFIDENCE: f64 = 0.9;

/// Source recorded when an observation does not name one.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Maps a collector's loosely-structured item onto [`RegistryEntryData`].
///
/// Only the known attributes (see [`ModelFields::KNOWN`]) are kept, plus any
/// names explicitly allow-listed with [`Normalizer::with_extra_fields`].
/// Everything else in the raw item is dropped. Normalization never fails:
/// an item without a usable identity gets the `unknown-model` sentinel.
#[derive(Debug, Clone)]
pub struct Normalizer {
    confidence: f64,
    extra_fields: BTreeSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            extra_fields: BTreeSet::new(),
        }
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also carry these raw keys into `fields.extra`.
    ///
    /// Names of known attributes and identity keys are ignored.
    pub fn with_extra_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !ModelFields::is_known(&name) && !is_identity_key(&name) {
                self.extra_fields.insert(name);
            }
        }
        self
    }

    pub fn normalize(&self, raw: &RawObservation, provider: &str) -> RegistryEntryData {
        self.normalize_at(raw, provider, Utc::now())
    }

    /// Deterministic form of [`Normalizer::normalize`].
    pub fn normalize_at(
        &self,
        raw: &RawObservation,
        provider: &str,
        observed_at: DateTime<Utc>,
    ) -> RegistryEntryData {
        let mut entry = RegistryEntryData::new(provider, model_id(raw));
        let source = source_of(raw);

        let names = ModelFields::KNOWN
            .iter()
            .copied()
            .chain(self.extra_fields.iter().map(String::as_str));

        for name in names {
            match raw.get(name) {
                None | Some(JsonValue::Null) => {}
                Some(value) => entry.fields.set(
                    name,
                    FieldMetadata::new(value.clone(), source, observed_at, self.confidence),
                ),
            }
        }

        entry
    }
}

fn is_identity_key(name: &str) -> bool {
    matches!(name, "provider" | "model_name" | "id" | "source")
}

fn non_empty_str<'a>(raw: &'a RawObservation, key: &str) -> Option<&'a str> {
    raw.get(key)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Numeric ids are rendered as their JSON text, so `101` and `"101"` share a key.
fn identity_value(raw: &RawObservation, key: &str) -> Option<String> {
    match raw.get(key)? {
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn model_id(raw: &RawObservation) -> String {
    identity_value(raw, "model_name")
        .or_else(|| identity_value(raw, "id"))
        .unwrap_or_else(|| UNKNOWN_MODEL.to_string())
}

fn source_of(raw: &RawObservation) -> &str {
    non_empty_str(raw, "source").unwrap_or(UNKNOWN_SOURCE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(v: JsonValue) -> RawObservation {
        match v {
            JsonValue::Object(m) => m,
            _ => unreachable!(),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn maps_recognized_fields_with_provenance() {
        let item = raw(json!({
            "model_name": "m1",
            "source": "pricing-page",
            "pricing": {"input": 1.0},
            "context_window": 8192,
            "marketing_blurb": "fast!"
        }));

        let entry = Normalizer::new().normalize_at(&item, "acme", at());
        assert_eq!(entry.provider, "acme");
        assert_eq!(entry.model, "m1");
        assert_eq!(entry.fields.len(), 2);

        let pricing = entry.fields.pricing.as_ref().unwrap();
        assert_eq!(pricing.value, json!({"input": 1.0}));
        assert_eq!(pricing.sources, vec!["pricing-page"]);
        assert_eq!(pricing.last_verified, at());
        assert_eq!(pricing.confidence, DEFAULT_CONFIDENCE);
        assert!(pricing.conflicts.is_empty());
        assert!(entry.fields.get("marketing_blurb").is_none());
    }

    #[test]
    fn identity_falls_back_from_model_name_to_id_to_sentinel() {
        let n = Normalizer::new();
        assert_eq!(n.normalize_at(&raw(json!({"model_name": "a", "id": "b"})), "p", at()).model, "a");
        assert_eq!(n.normalize_at(&raw(json!({"model_name": "", "id": "b"})), "p", at()).model, "b");
        assert_eq!(n.normalize_at(&raw(json!({"id": "b"})), "p", at()).model, "b");

        let unnamed = n.normalize_at(&raw(json!({"pricing": {}})), "p", at());
        assert_eq!(unnamed.model, UNKNOWN_MODEL);
        assert!(unnamed.has_sentinel_identity());
        assert!(unnamed.fields.pricing.is_some());
    }

    #[test]
    fn numeric_ids_are_distinct_identities() {
        let n = Normalizer::new();
        let a = n.normalize_at(&raw(json!({"id": 101, "context_window": 1})), "acme", at());
        let b = n.normalize_at(&raw(json!({"id": 202, "context_window": 1})), "acme", at());

        assert_eq!(a.model, "101");
        assert_eq!(b.model, "202");
        assert_ne!(a.key(), b.key());
        assert!(!a.has_sentinel_identity());

        let named = n.normalize_at(&raw(json!({"model_name": 7, "id": "x"})), "acme", at());
        assert_eq!(named.model, "7");
    }

    #[test]
    fn non_scalar_ids_fall_back_to_sentinel() {
        let e = Normalizer::new().normalize_at(&raw(json!({"id": {"v": 1}, "model_name": true})), "p", at());
        assert_eq!(e.model, UNKNOWN_MODEL);
    }

    #[test]
    fn missing_or_non_string_source_is_unknown() {
        let n = Normalizer::new();
        let e = n.normalize_at(&raw(json!({"id": "m", "context_window": 1})), "p", at());
        assert_eq!(e.fields.context_window.unwrap().sources, vec![UNKNOWN_SOURCE]);

        let e = n.normalize_at(&raw(json!({"id": "m", "source": 7, "context_window": 1})), "p", at());
        assert_eq!(e.fields.context_window.unwrap().sources, vec![UNKNOWN_SOURCE]);
    }

    #[test]
    fn null_values_are_treated_as_absent() {
        let e = Normalizer::new().normalize_at(&raw(json!({"id": "m", "pricing": null})), "p", at());
        assert!(e.fields.is_empty());
    }

    #[test]
    fn allow_listed_extras_are_kept() {
        let n = Normalizer::new().with_extra_fields(["modalities", "pricing", "id"]);
        let e = n.normalize_at(
            &raw(json!({"id": "m", "modalities": ["text"], "other": 1})),
            "p",
            at(),
        );
        assert_eq!(e.fields.extra.len(), 1);
        assert_eq!(e.fields.get("modalities").unwrap().value, json!(["text"]));
    }

    #[test]
    fn normalization_is_deterministic() {
        let item = raw(json!({"id": "m", "pricing": {"a": 1}, "rate_limits": {"rpm": 5}}));
        let n = Normalizer::new();
        assert_eq!(n.normalize_at(&item, "p", at()), n.normalize_at(&item, "p", at()));
    }

    #[test]
    fn output_satisfies_entry_invariants() {
        let item = raw(json!({"id": "m", "capabilities": ["tools"], "context_window": 4096}));
        assert!(Normalizer::new().normalize_at(&item, "p", at()).validate().is_ok());
    }
}
