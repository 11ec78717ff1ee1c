//! Built-in source connectors
//!
//! - `memory`: named in-process datasets (seeding and tests)
//! - `json-file`: a JSON array, or newline-delimited JSON read lazily

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::RwLock;

use super::connector::{ConnectorFault, SourceConnector, SourceHandle};
use crate::models::{RawCandidate, SourceDescriptor};

pub const MEMORY_SYSTEM: &str = "memory";
pub const JSON_FILE_SYSTEM: &str = "json-file";

/// Connector over named in-memory datasets (parameter `dataset`)
#[derive(Clone, Default)]
pub struct MemoryConnector {
    datasets: Arc<RwLock<HashMap<String, Vec<RawCandidate>>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_dataset(&self, name: impl Into<String>, records: Vec<RawCandidate>) {
        self.datasets.write().await.insert(name.into(), records);
    }
}

#[async_trait]
impl SourceConnector for MemoryConnector {
    fn system(&self) -> &str {
        MEMORY_SYSTEM
    }

    async fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn SourceHandle>, ConnectorFault> {
        let name = source
            .parameter("dataset")
            .ok_or_else(|| ConnectorFault::InvalidParameters("missing 'dataset'".to_string()))?;

        let records = self
            .datasets
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectorFault::Unreachable(format!("no dataset named '{}'", name)))?;

        Ok(Box::new(VecHandle::new(records)))
    }
}

/// Handle over a fully loaded sequence
struct VecHandle {
    records: std::vec::IntoIter<RawCandidate>,
    total: u64,
}

impl VecHandle {
    fn new(records: Vec<RawCandidate>) -> Self {
        Self {
            total: records.len() as u64,
            records: records.into_iter(),
        }
    }
}

#[async_trait]
impl SourceHandle for VecHandle {
    async fn estimate_total(&mut self) -> Result<Option<u64>, ConnectorFault> {
        Ok(Some(self.total))
    }

    async fn next_batch(
        &mut self,
        batch_size: usize,
    ) -> Result<Option<Vec<RawCandidate>>, ConnectorFault> {
        let batch: Vec<RawCandidate> = self.records.by_ref().take(batch_size).collect();
        Ok((!batch.is_empty()).then_some(batch))
    }

    async fn close(&mut self) -> Result<(), ConnectorFault> {
        Ok(())
    }
}

/// Reads candidates from a file (parameter `path`)
///
/// `format` may be `array` or `ndjson`; when absent, `.ndjson` and `.jsonl`
/// files are read as NDJSON and anything else as a JSON array. NDJSON is
/// streamed, so its total is unknown up front.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Array,
    Ndjson,
}

impl FileFormat {
    fn for_source(source: &SourceDescriptor, path: &std::path::Path) -> Result<Self, ConnectorFault> {
        match source.parameter("format") {
            Some("array") => Ok(FileFormat::Array),
            Some("ndjson") => Ok(FileFormat::Ndjson),
            Some(other) => Err(ConnectorFault::InvalidParameters(format!(
                "unknown format '{}'",
                other
            ))),
            None => match path.extension().and_then(|e| e.to_str()) {
                Some("ndjson") | Some("jsonl") => Ok(FileFormat::Ndjson),
                _ => Ok(FileFormat::Array),
            },
        }
    }
}

#[async_trait]
impl SourceConnector for JsonFileConnector {
    fn system(&self) -> &str {
        JSON_FILE_SYSTEM
    }

    async fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn SourceHandle>, ConnectorFault> {
        let path = PathBuf::from(
            source
                .parameter("path")
                .ok_or_else(|| ConnectorFault::InvalidParameters("missing 'path'".to_string()))?,
        );

        match FileFormat::for_source(source, &path)? {
            FileFormat::Array => {
                let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    ConnectorFault::Unreachable(format!("{}: {}", path.display(), e))
                })?;
                let records: Vec<RawCandidate> = serde_json::from_str(&text).map_err(|e| {
                    ConnectorFault::Read(format!("{}: {}", path.display(), e))
                })?;
                tracing::debug!(path = %path.display(), records = records.len(), "Opened JSON source");
                Ok(Box::new(VecHandle::new(records)))
            }
            FileFormat::Ndjson => {
                let file = File::open(&path).await.map_err(|e| {
                    ConnectorFault::Unreachable(format!("{}: {}", path.display(), e))
                })?;
                tracing::debug!(path = %path.display(), "Opened NDJSON source");
                Ok(Box::new(NdjsonHandle {
                    path,
                    lines: Some(BufReader::new(file).lines()),
                    line_number: 0,
                }))
            }
        }
    }
}

struct NdjsonHandle {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_number: usize,
}

#[async_trait]
impl SourceHandle for NdjsonHandle {
    async fn estimate_total(&mut self) -> Result<Option<u64>, ConnectorFault> {
        Ok(None)
    }

    async fn next_batch(
        &mut self,
        batch_size: usize,
    ) -> Result<Option<Vec<RawCandidate>>, ConnectorFault> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };

        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            let line = lines.next_line().await.map_err(|e| {
                ConnectorFault::Read(format!("{}: {}", self.path.display(), e))
            })?;
            let Some(line) = line else {
                self.lines = None;
                break;
            };
            self.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }
            let record: RawCandidate = serde_json::from_str(&line).map_err(|e| {
                ConnectorFault::Read(format!(
                    "{} line {}: {}",
                    self.path.display(),
                    self.line_number,
                    e
                ))
            })?;
            batch.push(record);
        }

        Ok((!batch.is_empty()).then_some(batch))
    }

    async fn close(&mut self) -> Result<(), ConnectorFault> {
        self.lines = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn candidate(n: usize) -> RawCandidate {
        RawCandidate {
            external_id: Some(format!("R{}", n)),
            title: format!("Record {}", n),
            description: "Body".to_string(),
            category: "process".to_string(),
            ..RawCandidate::default()
        }
    }

    async fn drain(handle: &mut Box<dyn SourceHandle>, batch_size: usize) -> Vec<usize> {
        let mut sizes = Vec::new();
        while let Some(batch) = handle.next_batch(batch_size).await.unwrap() {
            sizes.push(batch.len());
        }
        sizes
    }

    #[tokio::test]
    async fn test_memory_connector_batches() {
        let connector = MemoryConnector::new();
        connector
            .put_dataset("legacy", (1..=5).map(candidate).collect())
            .await;

        let source = SourceDescriptor::new(MEMORY_SYSTEM).with_parameter("dataset", "legacy");
        let mut handle = connector.open(&source).await.unwrap();
        assert_eq!(handle.estimate_total().await.unwrap(), Some(5));
        assert_eq!(drain(&mut handle, 2).await, vec![2, 2, 1]);
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_connector_unknown_dataset() {
        let connector = MemoryConnector::new();
        let source = SourceDescriptor::new(MEMORY_SYSTEM).with_parameter("dataset", "missing");
        assert!(matches!(
            connector.open(&source).await,
            Err(ConnectorFault::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_json_array_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        let records: Vec<RawCandidate> = (1..=3).map(candidate).collect();
        std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

        let source = SourceDescriptor::new(JSON_FILE_SYSTEM)
            .with_parameter("path", path.to_string_lossy());
        let mut handle = JsonFileConnector.open(&source).await.unwrap();
        assert_eq!(handle.estimate_total().await.unwrap(), Some(3));
        assert_eq!(drain(&mut handle, 2).await, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_ndjson_file_streams_and_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for n in 1..=3 {
            writeln!(file, "{}", serde_json::to_string(&candidate(n)).unwrap()).unwrap();
            writeln!(file).unwrap();
        }

        let source = SourceDescriptor::new(JSON_FILE_SYSTEM)
            .with_parameter("path", path.to_string_lossy());
        let mut handle = JsonFileConnector.open(&source).await.unwrap();
        assert_eq!(handle.estimate_total().await.unwrap(), None);
        assert_eq!(drain(&mut handle, 2).await, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_malformed_ndjson_line_is_read_fault() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ndjson");
        std::fs::write(&path, "{\"title\": \"ok\"}\nnot json\n").unwrap();

        let source = SourceDescriptor::new(JSON_FILE_SYSTEM)
            .with_parameter("path", path.to_string_lossy());
        let mut handle = JsonFileConnector.open(&source).await.unwrap();
        let err = handle.next_batch(10).await.unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn test_missing_file_is_unreachable() {
        let source = SourceDescriptor::new(JSON_FILE_SYSTEM)
            .with_parameter("path", "/nonexistent/export.json");
        assert!(matches!(
            JsonFileConnector.open(&source).await,
            Err(ConnectorFault::Unreachable(_))
        ));
    }
}
