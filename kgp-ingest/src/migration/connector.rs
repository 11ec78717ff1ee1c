//! Source Connector contract
//!
//! A connector opens a handle on one external system; the handle yields a
//! finite sequence of raw candidates in batches. An empty batch and `None`
//! both mean the sequence is exhausted.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{RawCandidate, SourceDescriptor};

/// Source-side failure; always fails the job
#[derive(Debug, Error)]
pub enum ConnectorFault {
    #[error("unknown source system '{0}'")]
    UnknownSystem(String),

    #[error("invalid source parameters: {0}")]
    InvalidParameters(String),

    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("source read failed: {0}")]
    Read(String),
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// System name matched against `SourceDescriptor::system`
    fn system(&self) -> &str;

    async fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn SourceHandle>, ConnectorFault>;
}

#[async_trait]
pub trait SourceHandle: Send {
    /// Record count if the source knows it up front
    async fn estimate_total(&mut self) -> Result<Option<u64>, ConnectorFault>;

    /// Up to `batch_size` candidates, or None once exhausted
    async fn next_batch(&mut self, batch_size: usize)
        -> Result<Option<Vec<RawCandidate>>, ConnectorFault>;

    async fn close(&mut self) -> Result<(), ConnectorFault>;
}

/// Resolves source system names to connectors
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn SourceConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `json-file` connector
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::sources::JsonFileConnector));
        registry
    }

    /// Add a connector, replacing any with the same system name
    pub fn register(&mut self, connector: Arc<dyn SourceConnector>) {
        self.connectors
            .insert(connector.system().to_string(), connector);
    }

    pub fn resolve(&self, system: &str) -> Result<Arc<dyn SourceConnector>, ConnectorFault> {
        self.connectors
            .get(system)
            .cloned()
            .ok_or_else(|| ConnectorFault::UnknownSystem(system.to_string()))
    }

    pub fn systems(&self) -> Vec<String> {
        let mut systems: Vec<String> = self.connectors.keys().cloned().collect();
        systems.sort();
        systems
    }
}
