//! Registry identity: the `(provider, model)` primary key.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Sentinel model identifier assigned when an observation carries no identity.
pub const UNKNOWN_MODEL: &str = "unknown-model";

/// Globally unique identity of a registry entry.
///
/// Displays as `provider:model`, which is also the dedup cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub provider: String,
    pub model: String,
}

impl ModelKey {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// True when the model id is the sentinel assigned to unidentified input.
    pub fn is_sentinel(&self) -> bool {
        self.model == UNKNOWN_MODEL
    }
}

impl core::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

impl FromStr for ModelKey {
    type Err = DomainError;

    /// Parses `provider:model`. Only the first `:` separates the parts, so
    /// model ids such as `ft:base:org` survive intact.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s
            .split_once(':')
            .ok_or_else(|| DomainError::invalid_key(format!("expected provider:model, got '{s}'")))?;

        if provider.is_empty() || model.is_empty() {
            return Err(DomainError::invalid_key(format!(
                "provider and model must be non-empty in '{s}'"
            )));
        }

        Ok(Self::new(provider, model))
    }
}
