//! Subcommand bodies.
//!
//! The registry store and the Redis clients are synchronous; everything that
//! touches them runs on the blocking pool, where the Postgres store can
//! `block_on` the ambient runtime.

use std::path::PathBuf;
use std::sync::{Arc, mpsc};

use anyhow::{Context, bail};
use sqlx::PgPool;
use tracing::{info, warn};

use atlas_core::ModelKey;
use atlas_infra::orchestrator::Orchestrator;
use atlas_infra::pipeline::IngestPipeline;
use atlas_infra::state::{InMemoryStateTracker, RedisStateTracker};
use atlas_infra::store::PostgresRegistryStore;
use atlas_infra::stream::RedisIngestionStream;
use atlas_infra::workers::StreamConsumer;
use atlas_ingest::FileCollector;

use crate::cli::ConnectArgs;

async fn connect_store(connect: &ConnectArgs) -> anyhow::Result<Arc<PostgresRegistryStore>> {
    let pool = PgPool::connect(&connect.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = PostgresRegistryStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("failed to create registry tables")?;
    Ok(Arc::new(store))
}

fn redis_pipeline(
    connect: &ConnectArgs,
    store: Arc<PostgresRegistryStore>,
) -> anyhow::Result<(RedisIngestionStream, IngestPipeline<Arc<PostgresRegistryStore>, RedisStateTracker>)> {
    let settings = connect.settings();

    let stream = RedisIngestionStream::new(&settings.redis_url, Some(settings.stream_key.clone()))
        .context("invalid Redis URL")?
        .with_claim_idle(settings.claim_idle);
    let tracker = RedisStateTracker::new(&settings.redis_url, Some(settings.state_prefix.clone()))
        .context("invalid Redis URL")?;

    Ok((stream, IngestPipeline::new(store, tracker)))
}

pub async fn consume(connect: ConnectArgs) -> anyhow::Result<()> {
    let settings = connect.settings();
    let store = connect_store(&connect).await?;
    let (stream, pipeline) = redis_pipeline(&connect, store)?;
    let consumer = StreamConsumer::new(stream, pipeline, settings.consumer_config());

    info!(
        stream = %settings.stream_key,
        group = %settings.consumer_group,
        consumer = %settings.consumer_name,
        "starting stream consumer"
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let mut task = tokio::task::spawn_blocking(move || {
        consumer.setup()?;
        consumer.run(&shutdown_rx);
        Ok::<_, atlas_infra::workers::ConsumerError>(consumer.stats())
    });

    let stats = tokio::select! {
        joined = &mut task => joined.context("consumer task panicked")??,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for Ctrl-C; stopping");
            }
            info!("shutdown requested; finishing in-flight batch");
            let _ = shutdown_tx.send(());
            task.await.context("consumer task panicked")??
        }
    };

    info!(
        received = stats.received,
        committed = stats.committed,
        unchanged = stats.unchanged,
        dead_lettered = stats.dropped_malformed,
        failed = stats.failed,
        "consumer exited"
    );
    Ok(())
}

pub async fn ingest(
    connect: ConnectArgs,
    provider: String,
    file: PathBuf,
    via_stream: bool,
) -> anyhow::Result<()> {
    let store = connect_store(&connect).await?;
    let (stream, pipeline) = redis_pipeline(&connect, store)?;
    let orchestrator = Orchestrator::new(pipeline);
    let collector = FileCollector::new(provider, file);

    let report = tokio::task::spawn_blocking(move || {
        if via_stream {
            orchestrator.dispatch_collector(&collector, &stream)
        } else {
            orchestrator.run_collector(&collector)
        }
    })
    .await
    .context("ingest task panicked")?
    .context("collector pass failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.failed > 0 {
        bail!("{} of {} items failed", report.failed, report.fetched);
    }
    Ok(())
}

pub async fn dump(connect: ConnectArgs, out: PathBuf) -> anyhow::Result<()> {
    let store = connect_store(&connect).await?;
    let orchestrator = Orchestrator::new(IngestPipeline::new(store, InMemoryStateTracker::new()));

    let target = out.clone();
    let written = tokio::task::spawn_blocking(move || orchestrator.export_registry(&target))
        .await
        .context("export task panicked")?
        .with_context(|| format!("failed to export registry to {}", out.display()))?;

    info!(entries = written, path = %out.display(), "registry exported");
    Ok(())
}

pub async fn history(connect: ConnectArgs, key: String) -> anyhow::Result<()> {
    let key: ModelKey = key.parse().context("invalid model key")?;
    let store = connect_store(&connect).await?;

    let trail = store.load_trail(&key).await.context("failed to load history")?;
    println!("{}", serde_json::to_string_pretty(&trail.history)?);

    if !trail.replays_to_current().context("history does not replay")? {
        bail!("history of {key} does not replay to the current entry");
    }
    info!(key = %key, rows = trail.history.len(), "history replays to current entry");
    Ok(())
}
