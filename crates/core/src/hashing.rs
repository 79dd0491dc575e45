//! Stable content hashing for the dedup cache.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::json::canonicalize;

/// Compute a stable SHA-256 hex digest of a JSON document.
///
/// Objects and arrays are hashed over their canonical (sorted-key) JSON text,
/// so documents that differ only in key order hash identically. Bare strings
/// hash their contents; other scalars hash their JSON text.
pub fn compute_hash(data: &Value) -> String {
    let serialized = match data {
        Value::Object(_) | Value::Array(_) => canonicalize(data).to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Map};

    #[test]
    fn key_order_does_not_change_hash() {
        let a: Value =
            serde_json::from_str(r#"{"provider":"acme","model_name":"m1","pricing":{"input":1,"output":2}}"#)
                .unwrap();
        let b: Value =
            serde_json::from_str(r#"{"pricing":{"output":2,"input":1},"model_name":"m1","provider":"acme"}"#)
                .unwrap();
        assert_eq!(compute_hash(&a), compute_hash(&b));
    }

    #[test]
    fn value_change_changes_hash() {
        let a = json!({"pricing": {"input": 1}});
        let b = json!({"pricing": {"input": 2}});
        assert_ne!(compute_hash(&a), compute_hash(&b));
    }

    #[test]
    fn digest_is_lowercase_hex_sha256() {
        let h = compute_hash(&json!({}));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // sha256("{}")
        assert_eq!(h, "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a");
    }

    #[test]
    fn bare_string_hashes_its_contents() {
        // sha256("abc")
        assert_eq!(
            compute_hash(&json!("abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: inserting the same entries in reverse order yields the same hash.
        #[test]
        fn hash_is_insertion_order_independent(
            entries in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12)
        ) {
            let mut forward = Map::new();
            for (k, v) in &entries {
                forward.insert(k.clone(), json!(v));
            }
            let mut backward = Map::new();
            for (k, v) in entries.iter().rev() {
                backward.insert(k.clone(), json!(v));
            }

            prop_assert_eq!(
                compute_hash(&Value::Object(forward)),
                compute_hash(&Value::Object(backward))
            );
        }
    }
}
