//! Consumer-group worker that drains the ingestion stream into the registry.
//!
//! ## Message handling
//!
//! - Malformed message (missing payload, invalid JSON, non-object): logged as a
//!   data-quality event, copied to the dead-letter log (best-effort) and
//!   acknowledged so it is never redelivered. If that ack is lost the message
//!   comes back and is dead-lettered again: dead-letter copies are
//!   at-least-once and carry `original_message_id` for deduplication.
//! - Well-formed message: run through [`IngestPipeline::process`], acknowledged
//!   only after it succeeds. A persistence failure leaves the message pending;
//!   it is redelivered once idle and the idempotent diff absorbs any replay.
//! - Ack failure: logged. The message comes back and diffs to a no-op.
//!
//! ## Loop
//!
//! Shutdown is checked between polls only. A poll-level transport error backs
//! off for `error_backoff` and retries.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use atlas_stream::{IngestionStream, StreamMessage, decode_payload};

use crate::pipeline::IngestPipeline;
use crate::state::StateTracker;
use crate::store::RegistryStore;

/// Provider recorded for stream items that do not carry one.
pub const UNKNOWN_PROVIDER: &str = "unknown";

/// Stream consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer group name
    pub group: String,
    /// Consumer name, unique within the group
    pub consumer: String,
    /// Maximum messages per poll
    pub batch_size: usize,
    /// Maximum time a poll blocks waiting for new messages
    pub block: Duration,
    /// Pause after a transport-level poll error
    pub error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: "ingestion_group".to_string(),
            consumer: format!("consumer-{}", uuid::Uuid::now_v7()),
            batch_size: 10,
            block: Duration::from_millis(5000),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl ConsumerConfig {
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to set up consumer group '{group}': {message}")]
    Setup { group: String, message: String },

    #[error("stream read failed: {0}")]
    Poll(String),

    #[error("failed to spawn consumer thread: {0}")]
    Spawn(String),
}

/// Consumer runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub committed: u64,
    pub unchanged: u64,
    pub dropped_malformed: u64,
    pub failed: u64,
    pub poll_errors: u64,
    pub uptime_secs: u64,
}

/// What happened to a single stream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// A history row was written; acknowledged.
    Committed,
    /// Nothing changed; acknowledged.
    Unchanged,
    /// Malformed; dead-lettered and acknowledged.
    DeadLettered,
    /// Processing failed; left pending for redelivery.
    Failed,
}

/// Handle to control a running consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ConsumerStats>>,
}

impl ConsumerHandle {
    /// Request graceful shutdown and wait for the in-flight poll to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Stream → pipeline worker.
pub struct StreamConsumer<X, S, T> {
    stream: X,
    pipeline: IngestPipeline<S, T>,
    config: ConsumerConfig,
    stats: Arc<Mutex<ConsumerStats>>,
}

impl<X, S, T> StreamConsumer<X, S, T>
where
    X: IngestionStream,
    S: RegistryStore,
    T: StateTracker,
{
    pub fn new(stream: X, pipeline: IngestPipeline<S, T>, config: ConsumerConfig) -> Self {
        Self {
            stream,
            pipeline,
            config,
            stats: Arc::new(Mutex::new(ConsumerStats::default())),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &IngestPipeline<S, T> {
        &self.pipeline
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Create the consumer group (idempotent).
    pub fn setup(&self) -> Result<(), ConsumerError> {
        self.stream
            .ensure_group(&self.config.group)
            .map_err(|e| ConsumerError::Setup {
                group: self.config.group.clone(),
                message: e.to_string(),
            })
    }

    /// One bounded poll plus handling of every message it returned.
    ///
    /// Returns the number of messages received.
    pub fn poll_once(&self) -> Result<usize, ConsumerError> {
        let messages = self
            .stream
            .read_group(
                &self.config.group,
                &self.config.consumer,
                self.config.batch_size,
                self.config.block,
            )
            .map_err(|e| ConsumerError::Poll(e.to_string()))?;

        self.bump(|s| s.received += messages.len() as u64);
        for message in &messages {
            self.handle_message(message);
        }
        Ok(messages.len())
    }

    pub fn handle_message(&self, message: &StreamMessage) -> MessageOutcome {
        let item = match decode_payload(message.payload.as_deref()) {
            Ok(item) => item,
            Err(malformed) => {
                warn!(
                    data_quality = "malformed_payload",
                    message_id = %message.id,
                    error = %malformed,
                    "dropping malformed stream message"
                );
                if let Err(e) = self.stream.dead_letter(message, &malformed.to_string()) {
                    warn!(message_id = %message.id, error = %e, "failed to dead-letter message");
                }
                self.ack(message);
                self.bump(|s| s.dropped_malformed += 1);
                return MessageOutcome::DeadLettered;
            }
        };

        let provider = item
            .get("provider")
            .and_then(JsonValue::as_str)
            .filter(|p| !p.is_empty())
            .unwrap_or(UNKNOWN_PROVIDER)
            .to_string();

        match self.pipeline.process(&item, &provider) {
            Ok(outcome) => {
                self.ack(message);
                if outcome.committed() {
                    self.bump(|s| s.committed += 1);
                    MessageOutcome::Committed
                } else {
                    self.bump(|s| s.unchanged += 1);
                    MessageOutcome::Unchanged
                }
            }
            Err(e) => {
                error!(
                    message_id = %message.id,
                    deliveries = message.deliveries,
                    error = %e,
                    "failed to process stream message; leaving it pending"
                );
                self.bump(|s| s.failed += 1);
                MessageOutcome::Failed
            }
        }
    }

    /// Poll until a shutdown signal arrives (or its sender is dropped).
    pub fn run(&self, shutdown_rx: &mpsc::Receiver<()>) {
        info!(
            group = %self.config.group,
            consumer = %self.config.consumer,
            "stream consumer started"
        );
        let started = Instant::now();

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
                Err(mpsc::TryRecvError::Empty) => {}
            }

            match self.poll_once() {
                Ok(0) => debug!(consumer = %self.config.consumer, "poll returned no messages"),
                Ok(_) => {}
                Err(e) => {
                    error!(consumer = %self.config.consumer, error = %e, "stream poll failed");
                    self.bump(|s| s.poll_errors += 1);

                    // Back off, but wake immediately on shutdown.
                    match shutdown_rx.recv_timeout(self.config.error_backoff) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                    }
                }
            }

            self.bump(|s| s.uptime_secs = started.elapsed().as_secs());
        }

        info!(consumer = %self.config.consumer, stats = ?self.stats(), "stream consumer stopped");
    }

    fn ack(&self, message: &StreamMessage) {
        if let Err(e) = self
            .stream
            .ack(&self.config.group, std::slice::from_ref(&message.id))
        {
            warn!(
                message_id = %message.id,
                error = %e,
                "ack failed; message will be redelivered"
            );
        }
    }

    fn bump(&self, f: impl FnOnce(&mut ConsumerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

impl<X, S, T> StreamConsumer<X, S, T>
where
    X: IngestionStream + 'static,
    S: RegistryStore + 'static,
    T: StateTracker + 'static,
{
    /// Set up the group, then run the loop on a named background thread.
    pub fn spawn(self) -> Result<ConsumerHandle, ConsumerError> {
        self.setup()?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = self.stats.clone();

        let join = thread::Builder::new()
            .name(self.config.consumer.clone())
            .spawn(move || self.run(&shutdown_rx))
            .map_err(|e| ConsumerError::Spawn(e.to_string()))?;

        Ok(ConsumerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}
