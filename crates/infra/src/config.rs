//! Resolved ingestion settings shared by the stream consumer, the Redis
//! transport and the state tracker.

use std::time::Duration;

use crate::workers::stream_consumer::ConsumerConfig;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_STREAM_KEY: &str = "stream:ingestion";
pub const DEFAULT_CONSUMER_GROUP: &str = "ingestion_group";
pub const DEFAULT_STATE_PREFIX: &str = "state";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    pub redis_url: String,
    pub stream_key: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub block: Duration,
    pub claim_idle: Duration,
    pub state_prefix: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            stream_key: DEFAULT_STREAM_KEY.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            consumer_name: format!("consumer-{}", uuid::Uuid::now_v7()),
            batch_size: 10,
            block: Duration::from_millis(5000),
            claim_idle: Duration::from_millis(60_000),
            state_prefix: DEFAULT_STATE_PREFIX.to_string(),
        }
    }
}

impl IngestSettings {
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    pub fn with_stream_key(mut self, key: impl Into<String>) -> Self {
        self.stream_key = key.into();
        self
    }

    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    /// Empty names keep the generated default.
    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.consumer_name = name;
        }
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_block_ms(mut self, ms: u64) -> Self {
        self.block = Duration::from_millis(ms);
        self
    }

    pub fn with_claim_idle_ms(mut self, ms: u64) -> Self {
        self.claim_idle = Duration::from_millis(ms);
        self
    }

    pub fn with_state_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.state_prefix = prefix.into();
        self
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::default()
            .with_group(self.consumer_group.clone())
            .with_consumer(self.consumer_name.clone())
            .with_batch_size(self.batch_size)
            .with_block(self.block)
    }
}
