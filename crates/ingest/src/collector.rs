//! Collector capability: where raw observations come from.
//!
//! Scrapers and crawlers live outside this workspace; they plug in by
//! implementing [`Collector`]. Two simple collectors are provided for tests,
//! demos and file-based imports.

use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use thiserror::Error;

use atlas_core::RawObservation;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("collector failed: {0}")]
    Fetch(String),
}

/// A source of raw observations for one provider.
///
/// `fetch` returns a whole batch. Collectors that can push into the ingestion
/// stream report `supports_emit() == true`; the orchestrator then appends each
/// item to the stream instead of processing it inline.
pub trait Collector: Send + Sync {
    fn provider(&self) -> &str;

    fn fetch(&self) -> Result<Vec<RawObservation>, CollectorError>;

    fn supports_emit(&self) -> bool {
        true
    }
}

/// Serves a fixed list of observations.
#[derive(Debug, Clone)]
pub struct StaticCollector {
    provider: String,
    items: Vec<RawObservation>,
    emit: bool,
}

impl StaticCollector {
    pub fn new(provider: impl Into<String>, items: Vec<RawObservation>) -> Self {
        Self {
            provider: provider.into(),
            items,
            emit: true,
        }
    }

    /// Mark this collector as pull-only (no stream emit).
    pub fn pull_only(mut self) -> Self {
        self.emit = false;
        self
    }
}

impl Collector for StaticCollector {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn fetch(&self) -> Result<Vec<RawObservation>, CollectorError> {
        Ok(self.items.clone())
    }

    fn supports_emit(&self) -> bool {
        self.emit
    }
}

/// Reads a JSON array of raw objects from disk on every fetch.
#[derive(Debug, Clone)]
pub struct FileCollector {
    provider: String,
    path: PathBuf,
    emit: bool,
}

impl FileCollector {
    pub fn new(provider: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            provider: provider.into(),
            path: path.into(),
            emit: true,
        }
    }

    pub fn pull_only(mut self) -> Self {
        self.emit = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_error(&self, message: impl Into<String>) -> CollectorError {
        CollectorError::Parse {
            path: self.path.clone(),
            message: message.into(),
        }
    }
}

impl Collector for FileCollector {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn fetch(&self) -> Result<Vec<RawObservation>, CollectorError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| CollectorError::Io {
            path: self.path.clone(),
            source,
        })?;

        let value: JsonValue =
            serde_json::from_str(&text).map_err(|e| self.parse_error(e.to_string()))?;
        let JsonValue::Array(items) = value else {
            return Err(self.parse_error("expected a JSON array of objects"));
        };

        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                JsonValue::Object(map) => Ok(map),
                _ => Err(self.parse_error(format!("item {i} is not an object"))),
            })
            .collect()
    }

    fn supports_emit(&self) -> bool {
        self.emit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("atlas-ingest-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("items.json");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn static_collector_serves_items_and_reports_capability() {
        let item = json!({"id": "m1"}).as_object().unwrap().clone();
        let c = StaticCollector::new("acme", vec![item.clone()]);
        assert_eq!(c.provider(), "acme");
        assert_eq!(c.fetch().unwrap(), vec![item]);
        assert!(c.supports_emit());
        assert!(!c.pull_only().supports_emit());
    }

    #[test]
    fn file_collector_reads_an_array_of_objects() {
        let path = temp_file("ok", r#"[{"id": "a"}, {"model_name": "b", "pricing": {"input": 1}}]"#);
        let items = FileCollector::new("acme", &path).fetch().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["model_name"], "b");
    }

    #[test]
    fn file_collector_rejects_non_arrays_and_non_objects() {
        let path = temp_file("obj", r#"{"id": "a"}"#);
        assert!(matches!(
            FileCollector::new("acme", &path).fetch(),
            Err(CollectorError::Parse { .. })
        ));

        let path = temp_file("mixed", r#"[{"id": "a"}, 3]"#);
        let err = FileCollector::new("acme", &path).fetch().unwrap_err();
        assert!(err.to_string().contains("item 1"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let c = FileCollector::new("acme", "/nonexistent/atlas/items.json");
        assert!(matches!(c.fetch(), Err(CollectorError::Io { .. })));
    }
}
