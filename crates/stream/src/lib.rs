//! Ingestion transport: a durable, ordered log read through consumer groups.
//!
//! This crate holds the transport abstraction as pure mechanics plus an
//! in-memory implementation for tests/dev. The Redis Streams implementation
//! lives in `atlas-infra`.

pub mod in_memory;
pub mod stream;
pub mod wire;

pub use in_memory::{DeadLetter, InMemoryIngestionStream, InMemoryStreamError};
pub use stream::{IngestionStream, StreamMessage};
pub use wire::{MalformedPayload, PAYLOAD_FIELD, decode_payload, emit, encode_payload};
