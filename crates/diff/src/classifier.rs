//! Rule table mapping a single field change to severity and kind.

use serde_json::Value as JsonValue;

use atlas_core::{ChangeKind, Classification, Severity};

/// Classify a change of `field` from `old` to `new`.
///
/// Rules, first match wins:
/// 1. `pricing` → medium / pricing change
/// 2. `context_window` shrinking (both numeric) → high / limit change, breaking
/// 3. any other `context_window` change → low / limit change
/// 4. anything else → low / unknown
pub fn classify(field: &str, old: &JsonValue, new: &JsonValue) -> Classification {
    match field {
        "pricing" => Classification::new(Severity::Medium, ChangeKind::PricingChange),
        "context_window" => match (old.as_f64(), new.as_f64()) {
            (Some(old), Some(new)) if new < old => {
                Classification::new(Severity::High, ChangeKind::LimitChange).breaking()
            }
            _ => Classification::new(Severity::Low, ChangeKind::LimitChange),
        },
        _ => Classification::new(Severity::Low, ChangeKind::Unknown),
    }
}
