//! Consumer-group transport abstraction (mechanics only).
//!
//! The ingestion stream is a durable, ordered, multi-consumer log:
//!
//! - **Consumer groups**: each message is claimed by exactly one consumer of a group at a time
//! - **At-least-once**: a message stays pending until acknowledged and can be
//!   reclaimed by any consumer in the group once it has been idle long enough
//! - **No ordering across redeliveries**: a reclaimed message may be seen after newer ones
//!
//! Consumers must therefore be idempotent.

use std::sync::Arc;
use std::time::Duration;

/// A message read from the stream through a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Transport-assigned id (e.g. `1700000000000-0`).
    pub id: String,
    /// The `payload` field, if the entry has one.
    pub payload: Option<String>,
    /// How many times this message has been delivered to the group.
    pub deliveries: u64,
}

/// Durable log consumed via a consumer-group protocol.
///
/// ## Read semantics
///
/// `read_group` first reclaims pending messages that have been idle longer than
/// the implementation's claim threshold (from any consumer of the group), and
/// only when there are none reads new messages, blocking up to `block`.
///
/// ## Thread safety
///
/// Implementations are `Send + Sync`; a single consumer instance is expected to
/// call `read_group`/`ack` from one thread.
pub trait IngestionStream: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create `group` at the stream's origin (creating the stream if needed).
    ///
    /// Idempotent: an already existing group is success.
    fn ensure_group(&self, group: &str) -> Result<(), Self::Error>;

    /// Append a message with a single `payload` field. Returns the message id.
    fn append(&self, payload: &str) -> Result<String, Self::Error>;

    /// Read up to `count` messages for `consumer` within `group`.
    fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, Self::Error>;

    /// Acknowledge processed messages (removes them from the pending list).
    fn ack(&self, group: &str, ids: &[String]) -> Result<(), Self::Error>;

    /// Copy a message that will never be processed to the dead-letter log.
    fn dead_letter(&self, message: &StreamMessage, reason: &str) -> Result<(), Self::Error>;
}

impl<S> IngestionStream for Arc<S>
where
    S: IngestionStream + ?Sized,
{
    type Error = S::Error;

    fn ensure_group(&self, group: &str) -> Result<(), Self::Error> {
        (**self).ensure_group(group)
    }

    fn append(&self, payload: &str) -> Result<String, Self::Error> {
        (**self).append(payload)
    }

    fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, Self::Error> {
        (**self).read_group(group, consumer, count, block)
    }

    fn ack(&self, group: &str, ids: &[String]) -> Result<(), Self::Error> {
        (**self).ack(group, ids)
    }

    fn dead_letter(&self, message: &StreamMessage, reason: &str) -> Result<(), Self::Error> {
        (**self).dead_letter(message, reason)
    }
}
