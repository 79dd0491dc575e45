//! Canonical registry document: one entry per `(provider, model)`.
//!
//! The persisted JSON shape is:
//!
//! ```text
//! { provider, model,
//!   fields: { <name>: { value, sources: [...], last_verified, confidence, conflicts: [...] } } }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{DomainError, DomainResult};
use crate::key::{ModelKey, UNKNOWN_MODEL};

/// A loosely-structured observation as produced by a collector.
pub type RawObservation = Map<String, JsonValue>;

/// A disagreeing observation retained for audit. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub source: String,
    pub value: JsonValue,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A single attribute value plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub value: JsonValue,
    /// Ordered set: insertion order is kept, duplicates are not.
    pub sources: Vec<String>,
    pub last_verified: DateTime<Utc>,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

impl FieldMetadata {
    pub fn new(
        value: JsonValue,
        source: impl Into<String>,
        last_verified: DateTime<Utc>,
        confidence: f64,
    ) -> Self {
        Self {
            value,
            sources: vec![source.into()],
            last_verified,
            confidence,
            conflicts: Vec::new(),
        }
    }

    /// Add a source, keeping `sources` duplicate-free. Returns `false` if it was already present.
    pub fn add_source(&mut self, source: impl Into<String>) -> bool {
        let source = source.into();
        if self.sources.contains(&source) {
            return false;
        }
        self.sources.push(source);
        true
    }

    /// Check the provenance invariants of this field.
    pub fn validate(&self) -> DomainResult<()> {
        if !self.value.is_null() && self.sources.is_empty() {
            return Err(DomainError::invariant("field has a value but no sources"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DomainError::invariant(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Field mapping of a registry entry.
///
/// Known attributes are explicit; anything else a stored document carries
/// round-trips through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<FieldMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<FieldMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<FieldMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<FieldMetadata>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, FieldMetadata>,
}

impl ModelFields {
    /// Names of the explicitly modelled attributes, in iteration order.
    pub const KNOWN: [&'static str; 4] = ["pricing", "context_window", "rate_limits", "capabilities"];

    pub fn is_known(name: &str) -> bool {
        Self::KNOWN.contains(&name)
    }

    pub fn get(&self, name: &str) -> Option<&FieldMetadata> {
        match name {
            "pricing" => self.pricing.as_ref(),
            "context_window" => self.context_window.as_ref(),
            "rate_limits" => self.rate_limits.as_ref(),
            "capabilities" => self.capabilities.as_ref(),
            other => self.extra.get(other),
        }
    }

    /// Set a field by name; unknown names land in `extra`.
    pub fn set(&mut self, name: &str, meta: FieldMetadata) {
        match name {
            "pricing" => self.pricing = Some(meta),
            "context_window" => self.context_window = Some(meta),
            "rate_limits" => self.rate_limits = Some(meta),
            "capabilities" => self.capabilities = Some(meta),
            other => {
                self.extra.insert(other.to_string(), meta);
            }
        }
    }

    /// Present fields in deterministic order: known fields first, then `extra` by key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldMetadata)> {
        let known = [
            ("pricing", self.pricing.as_ref()),
            ("context_window", self.context_window.as_ref()),
            ("rate_limits", self.rate_limits.as_ref()),
            ("capabilities", self.capabilities.as_ref()),
        ];

        known
            .into_iter()
            .filter_map(|(name, meta)| meta.map(|m| (name, m)))
            .chain(self.extra.iter().map(|(k, v)| (k.as_str(), v)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical current record for one `(provider, model)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntryData {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub fields: ModelFields,
}

impl RegistryEntryData {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            fields: ModelFields::default(),
        }
    }

    pub fn key(&self) -> ModelKey {
        ModelKey::new(self.provider.clone(), self.model.clone())
    }

    /// True when normalization could not resolve a model id.
    pub fn has_sentinel_identity(&self) -> bool {
        self.model == UNKNOWN_MODEL
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.provider.is_empty() {
            return Err(DomainError::validation("provider must be non-empty"));
        }
        if self.model.is_empty() {
            return Err(DomainError::validation("model must be non-empty"));
        }
        for (name, meta) in self.fields.iter() {
            meta.validate()
                .map_err(|e| DomainError::invariant(format!("field '{name}': {e}")))?;
        }
        Ok(())
    }
}
