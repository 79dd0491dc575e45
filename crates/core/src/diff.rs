//! Structured diff types.
//!
//! Wire format (as persisted in the history log):
//!
//! ```text
//! { type: "new_model" | "update",
//!   changes: [{ field, action, old_value?, new_value?, severity, kind, breaking? }],
//!   provider, model }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Alerting severity of a single field change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        })
    }
}

/// Semantic category of a change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    PricingChange,
    CapabilityAdded,
    CapabilityRemoved,
    LimitChange,
    NewModel,
    Unknown,
}

/// Output of the change classifier for one field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Classification {
    pub severity: Severity,
    pub kind: ChangeKind,
    pub breaking: Option<bool>,
}

impl Classification {
    pub fn new(severity: Severity, kind: ChangeKind) -> Self {
        Self {
            severity,
            kind,
            breaking: None,
        }
    }

    pub fn breaking(mut self) -> Self {
        self.breaking = Some(true);
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Added,
    Modified,
}

/// One changed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub field: String,
    pub action: ChangeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<JsonValue>,
    pub severity: Severity,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaking: Option<bool>,
}

impl Change {
    /// A field that did not exist before. Not classified.
    pub fn added(field: impl Into<String>, new_value: JsonValue) -> Self {
        Self {
            field: field.into(),
            action: ChangeAction::Added,
            old_value: None,
            new_value: Some(new_value),
            severity: Severity::Low,
            kind: ChangeKind::Unknown,
            breaking: None,
        }
    }

    pub fn modified(
        field: impl Into<String>,
        old_value: JsonValue,
        new_value: JsonValue,
        classification: Classification,
    ) -> Self {
        Self {
            field: field.into(),
            action: ChangeAction::Modified,
            old_value: Some(old_value),
            new_value: Some(new_value),
            severity: classification.severity,
            kind: classification.kind,
            breaking: classification.breaking,
        }
    }

    pub fn is_breaking(&self) -> bool {
        self.breaking.unwrap_or(false)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    NewModel,
    Update,
}

/// Structured description of what changed between two registry entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    #[serde(rename = "type")]
    pub diff_type: DiffType,
    pub changes: Vec<Change>,
    pub provider: String,
    pub model: String,
}

impl Diff {
    pub fn new_model(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            diff_type: DiffType::NewModel,
            changes: Vec::new(),
            provider: provider.into(),
            model: model.into(),
        }
    }

    pub fn update(provider: impl Into<String>, model: impl Into<String>, changes: Vec<Change>) -> Self {
        Self {
            diff_type: DiffType::Update,
            changes,
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Whether this diff should be persisted: a first sighting, or at least one change.
    pub fn is_material(&self) -> bool {
        self.diff_type == DiffType::NewModel || !self.changes.is_empty()
    }

    /// Highest severity across all changes (`None` when there are no changes).
    pub fn max_severity(&self) -> Option<Severity> {
        self.changes.iter().map(|c| c.severity).max()
    }

    pub fn has_breaking_change(&self) -> bool {
        self.changes.iter().any(Change::is_breaking)
    }
}
