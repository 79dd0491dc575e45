//! Synchronous batch path: collector → pipeline, without the stream.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use atlas_ingest::{Collector, CollectorError};
use atlas_stream::{IngestionStream, emit};

use crate::pipeline::IngestPipeline;
use crate::state::StateTracker;
use crate::store::{RegistryStore, StoreError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("collector '{provider}' failed: {source}")]
    Collector {
        provider: String,
        #[source]
        source: CollectorError,
    },

    #[error("failed to emit to ingestion stream: {0}")]
    Emit(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to export registry to {path}: {message}")]
    Export { path: String, message: String },
}

/// Counters for one collector pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub provider: String,
    pub fetched: usize,
    pub committed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub cache_hits: usize,
    /// Items appended to the ingestion stream instead of processed inline.
    pub emitted: usize,
}

/// Drives collectors through the shared pipeline.
pub struct Orchestrator<S, T> {
    pipeline: IngestPipeline<S, T>,
}

impl<S, T> Orchestrator<S, T>
where
    S: RegistryStore,
    T: StateTracker,
{
    pub fn new(pipeline: IngestPipeline<S, T>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &IngestPipeline<S, T> {
        &self.pipeline
    }

    /// Fetch once and process every item inline.
    ///
    /// A failing item is logged and counted; the pass carries on.
    #[instrument(skip(self, collector), fields(provider = %collector.provider()), err)]
    pub fn run_collector(&self, collector: &dyn Collector) -> Result<BatchReport, OrchestratorError> {
        let provider = collector.provider().to_string();
        let items = collector
            .fetch()
            .map_err(|source| OrchestratorError::Collector {
                provider: provider.clone(),
                source,
            })?;

        let mut report = BatchReport {
            provider: provider.clone(),
            fetched: items.len(),
            ..BatchReport::default()
        };

        for item in &items {
            match self.pipeline.process(item, &provider) {
                Ok(outcome) => {
                    if outcome.cache_hit {
                        report.cache_hits += 1;
                    }
                    if outcome.committed() {
                        report.committed += 1;
                    } else {
                        report.unchanged += 1;
                    }
                }
                Err(e) => {
                    error!(provider = %provider, error = %e, "failed to process collected item");
                    report.failed += 1;
                }
            }
        }

        info!(
            provider = %report.provider,
            fetched = report.fetched,
            committed = report.committed,
            unchanged = report.unchanged,
            failed = report.failed,
            cache_hits = report.cache_hits,
            "collector pass finished"
        );
        Ok(report)
    }

    /// Route a collector by capability: emit-capable collectors push every
    /// item onto `stream`; pull-only collectors are processed inline.
    #[instrument(skip(self, collector, stream), fields(provider = %collector.provider()), err)]
    pub fn dispatch_collector<X>(
        &self,
        collector: &dyn Collector,
        stream: &X,
    ) -> Result<BatchReport, OrchestratorError>
    where
        X: IngestionStream + ?Sized,
    {
        if !collector.supports_emit() {
            return self.run_collector(collector);
        }

        let provider = collector.provider().to_string();
        let items = collector
            .fetch()
            .map_err(|source| OrchestratorError::Collector {
                provider: provider.clone(),
                source,
            })?;

        let fetched = items.len();
        let mut emitted = 0;
        for item in items {
            emit(stream, &provider, item).map_err(|e| OrchestratorError::Emit(e.to_string()))?;
            emitted += 1;
        }

        info!(provider = %provider, emitted, "collector items emitted to ingestion stream");
        Ok(BatchReport {
            provider,
            fetched,
            emitted,
            ..BatchReport::default()
        })
    }

    /// Write every current entry as a pretty-printed JSON array to `path`.
    ///
    /// Parent directories are created as needed. Returns the number of entries written.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()), err)]
    pub fn export_registry(&self, path: impl AsRef<Path>) -> Result<usize, OrchestratorError> {
        let path = path.as_ref();
        let entries = self.pipeline.store().list()?;

        let export_error = |message: String| OrchestratorError::Export {
            path: path.display().to_string(),
            message,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| export_error(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(&entries).map_err(|e| export_error(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| export_error(e.to_string()))?;

        if entries.is_empty() {
            warn!("registry is empty; exported an empty array");
        }
        Ok(entries.len())
    }
}
