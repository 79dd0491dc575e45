//! Redis Streams-backed ingestion stream (durable, at-least-once delivery).
//!
//! This implementation uses Redis Streams (XADD/XREADGROUP) to provide:
//! - **Durable delivery**: entries persist until acknowledged
//! - **At-least-once**: unacknowledged entries are reclaimed (XCLAIM) once idle
//! - **Consumer groups**: each entry goes to one consumer of a group at a time
//! - **Dead-letter stream**: entries that can never be processed are copied aside
//!
//! ## Layout
//!
//! - **Stream key**: `stream:ingestion` (one entry per raw observation, field `payload`)
//! - **Consumer group**: `ingestion_group`, created at offset `0` with `MKSTREAM`
//! - **Dead-letter stream**: `<stream key>:dlq`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use redis::Commands;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use tracing::{debug, instrument, warn};

use atlas_stream::{IngestionStream, PAYLOAD_FIELD, StreamMessage};

/// Default stream key.
pub const DEFAULT_STREAM_KEY: &str = "stream:ingestion";

/// Default idle time after which a pending entry may be claimed by another consumer.
pub const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RedisIngestionStream {
    client: Arc<redis::Client>,
    stream_key: String,
    dlq_key: String,
    claim_idle: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),
}

impl RedisIngestionStream {
    /// Create a stream handle.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `stream_key` - Redis stream key (default: "stream:ingestion")
    pub fn new(redis_url: impl AsRef<str>, stream_key: Option<String>) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        Ok(Self::from_client(Arc::new(client), stream_key))
    }

    /// Share an existing client (e.g. with the state tracker).
    pub fn from_client(client: Arc<redis::Client>, stream_key: Option<String>) -> Self {
        let stream_key = stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string());
        Self {
            client,
            dlq_key: format!("{stream_key}:dlq"),
            stream_key,
            claim_idle: DEFAULT_CLAIM_IDLE,
        }
    }

    pub fn with_claim_idle(mut self, idle: Duration) -> Self {
        self.claim_idle = idle;
        self
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn dlq_key(&self) -> &str {
        &self.dlq_key
    }

    fn connection(&self) -> Result<redis::Connection, RedisStreamsError> {
        self.client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// Claim entries of `group` that have been pending longer than `claim_idle`.
    fn claim_idle_sync(
        &self,
        conn: &mut redis::Connection,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>, RedisStreamsError> {
        let min_idle_ms = self.claim_idle.as_millis() as u64;

        // XPENDING with IDLE lists candidates across every consumer of the group.
        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XPENDING failed: {e}")))?;

        if pending.ids.is_empty() {
            return Ok(vec![]);
        }

        let delivered: HashMap<String, usize> = pending
            .ids
            .iter()
            .map(|p| (p.id.clone(), p.times_delivered))
            .collect();
        let ids: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();

        // XCLAIM re-checks the idle time, so a concurrent claimer wins cleanly.
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&ids[..])
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XCLAIM failed: {e}")))?;

        let messages: Vec<StreamMessage> = claimed
            .ids
            .into_iter()
            .map(|entry| {
                let deliveries = delivered.get(&entry.id).map(|n| *n as u64 + 1).unwrap_or(1);
                message_from_entry(&entry, deliveries)
            })
            .collect();

        if !messages.is_empty() {
            debug!(count = messages.len(), "reclaimed idle pending entries");
        }
        Ok(messages)
    }

    /// Read never-delivered entries, blocking up to `block`.
    fn read_new_sync(
        &self,
        conn: &mut redis::Connection,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, RedisStreamsError> {
        let mut opts = StreamReadOptions::default().group(group, consumer).count(count);
        // BLOCK 0 would wait forever.
        if !block.is_zero() {
            opts = opts.block(block.as_millis() as usize);
        }

        // A timed-out blocking read replies nil.
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        Ok(reply
            .into_iter()
            .flat_map(|r| r.keys)
            .filter(|k| k.key == self.stream_key)
            .flat_map(|k| k.ids)
            .map(|entry| message_from_entry(&entry, 1))
            .collect())
    }
}

fn message_from_entry(entry: &StreamId, deliveries: u64) -> StreamMessage {
    StreamMessage {
        id: entry.id.clone(),
        payload: entry.get::<String>(PAYLOAD_FIELD),
        deliveries,
    }
}

impl IngestionStream for RedisIngestionStream {
    type Error = RedisStreamsError;

    /// `XGROUP CREATE <stream> <group> 0 MKSTREAM`; `BUSYGROUP` means it already exists.
    #[instrument(skip(self), fields(stream_key = %self.stream_key), err)]
    fn ensure_group(&self, group: &str) -> Result<(), Self::Error> {
        let mut conn = self.connection()?;

        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(RedisStreamsError::ConsumerGroup(format!(
                "XGROUP CREATE {group} failed: {e}"
            ))),
        }
    }

    fn append(&self, payload: &str) -> Result<String, Self::Error> {
        let mut conn = self.connection()?;

        redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))
    }

    /// Idle pending entries first (from any consumer), then new ones.
    fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, Self::Error> {
        let mut conn = self.connection()?;

        let claimed = self.claim_idle_sync(&mut conn, group, consumer, count)?;
        if !claimed.is_empty() {
            return Ok(claimed);
        }

        self.read_new_sync(&mut conn, group, consumer, count, block)
    }

    fn ack(&self, group: &str, ids: &[String]) -> Result<(), Self::Error> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection()?;
        let _: u64 = conn
            .xack(&self.stream_key, group, ids)
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    fn dead_letter(&self, message: &StreamMessage, reason: &str) -> Result<(), Self::Error> {
        let mut conn = self.connection()?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.dlq_key)
            .arg("*")
            .arg("original_message_id")
            .arg(&message.id)
            .arg("reason")
            .arg(reason)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339());
        if let Some(payload) = &message.payload {
            cmd.arg(PAYLOAD_FIELD).arg(payload);
        }

        let _: String = cmd
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("DLQ XADD failed: {e}")))?;

        warn!(
            message_id = %message.id,
            dlq_key = %self.dlq_key,
            reason,
            "Message sent to dead-letter stream"
        );
        Ok(())
    }
}
