//! Infrastructure layer: registry stores, state tracking, stream transports,
//! and the workers that tie them to the ingestion pipeline.

pub mod config;
pub mod orchestrator;
pub mod pipeline;
pub mod state;
pub mod store;
pub mod stream;
pub mod workers;


pub use config::IngestSettings;
pub use orchestrator::{BatchReport, Orchestrator, OrchestratorError};
pub use pipeline::{IngestOutcome, IngestPipeline, PipelineError};
