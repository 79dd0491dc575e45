//! `atlas-ingest` — turning collected raw observations into registry entries.
//!
//! - [`normalizer`]: raw observation → canonical [`atlas_core::RegistryEntryData`]
//! - [`collector`]: the capability external scrapers implement

pub mod collector;
pub mod normalizer;

pub use collector::{Collector, CollectorError, FileCollector, StaticCollector};
pub use normalizer::{DEFAULT_CONFIDENCE, Normalizer, UNKNOWN_SOURCE};
