//! Wire format of the ingestion stream.
//!
//! Each entry carries a single field, `payload`, holding the JSON-encoded raw
//! observation: `{"payload": "<json string>"}`.

use serde_json::Value as JsonValue;
use thiserror::Error;

use atlas_core::RawObservation;

use crate::stream::IngestionStream;

/// Name of the single field every stream entry carries.
pub const PAYLOAD_FIELD: &str = "payload";

/// Why a stream entry could not be turned into a raw observation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedPayload {
    #[error("payload field missing or empty")]
    Missing,

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload is JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

pub fn encode_payload(item: &RawObservation) -> String {
    JsonValue::Object(item.clone()).to_string()
}

pub fn decode_payload(payload: Option<&str>) -> Result<RawObservation, MalformedPayload> {
    let raw = match payload {
        Some(p) if !p.trim().is_empty() => p,
        _ => return Err(MalformedPayload::Missing),
    };

    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(other) => Err(MalformedPayload::NotAnObject(json_type_name(&other))),
        Err(e) => Err(MalformedPayload::InvalidJson(e.to_string())),
    }
}

/// Push a collected item onto the ingestion stream.
///
/// Tags the item with `provider` when it does not carry one already.
pub fn emit<S>(stream: &S, provider: &str, mut item: RawObservation) -> Result<String, S::Error>
where
    S: IngestionStream + ?Sized,
{
    if !item.contains_key("provider") {
        item.insert("provider".to_string(), JsonValue::String(provider.to_string()));
    }
    stream.append(&encode_payload(&item))
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
