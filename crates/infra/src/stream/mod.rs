//! Ingestion stream transports backed by external services.
//!
//! The transport contract and the in-memory log live in `atlas-stream`.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisIngestionStream, RedisStreamsError};
