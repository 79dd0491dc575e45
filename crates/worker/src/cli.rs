//! Command-line surface of the worker.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use atlas_infra::config::{
    DEFAULT_CONSUMER_GROUP, DEFAULT_REDIS_URL, DEFAULT_STATE_PREFIX, DEFAULT_STREAM_KEY, IngestSettings,
};
use atlas_observability::LogFormat;

/// Model registry ingestion worker.
#[derive(Parser, Debug)]
#[command(name = "atlas-worker", version, about)]
pub struct Cli {
    /// Log output format (json or pretty).
    #[arg(long, env = "LOG_FORMAT", default_value = "json", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume the ingestion stream until interrupted.
    Consume(ConnectArgs),

    /// Run one collector pass over a JSON file of observations.
    Ingest {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Provider the observations belong to.
        #[arg(long)]
        provider: String,

        /// JSON array of raw observation objects.
        #[arg(long)]
        file: PathBuf,

        /// Append items to the ingestion stream instead of processing inline.
        #[arg(long)]
        via_stream: bool,
    },

    /// Export every current registry entry to a JSON file.
    Dump {
        #[command(flatten)]
        connect: ConnectArgs,

        #[arg(long, default_value = "registry/latest.json")]
        out: PathBuf,
    },

    /// Print the change history of one model and verify it replays.
    History {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Model identity as `provider:model`.
        key: String,
    },
}

/// Connection and consumer settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    #[arg(long, env = "ATLAS_STREAM_KEY", default_value = DEFAULT_STREAM_KEY)]
    pub stream_key: String,

    #[arg(long, env = "ATLAS_CONSUMER_GROUP", default_value = DEFAULT_CONSUMER_GROUP)]
    pub consumer_group: String,

    /// Defaults to `consumer-<uuid>`.
    #[arg(long, env = "ATLAS_CONSUMER_NAME")]
    pub consumer_name: Option<String>,

    #[arg(long, env = "ATLAS_BATCH_SIZE", default_value_t = 10)]
    pub batch_size: usize,

    #[arg(long, env = "ATLAS_BLOCK_MS", default_value_t = 5000)]
    pub block_ms: u64,

    #[arg(long, env = "ATLAS_CLAIM_IDLE_MS", default_value_t = 60_000)]
    pub claim_idle_ms: u64,

    #[arg(long, env = "ATLAS_STATE_PREFIX", default_value = DEFAULT_STATE_PREFIX)]
    pub state_prefix: String,
}

impl ConnectArgs {
    pub fn settings(&self) -> IngestSettings {
        IngestSettings::default()
            .with_redis_url(self.redis_url.clone())
            .with_stream_key(self.stream_key.clone())
            .with_consumer_group(self.consumer_group.clone())
            .with_consumer_name(self.consumer_name.clone().unwrap_or_default())
            .with_batch_size(self.batch_size)
            .with_block_ms(self.block_ms)
            .with_claim_idle_ms(self.claim_idle_ms)
            .with_state_prefix(self.state_prefix.clone())
    }
}
