//! Bulk migration from external systems
//!
//! Jobs pull raw candidates from a [`SourceConnector`] in batches and feed
//! each one through the same admission gate as interactive submissions.

pub mod connector;
pub mod engine;
pub mod registry;
pub mod sources;

pub use connector::{ConnectorFault, ConnectorRegistry, SourceConnector, SourceHandle};
pub use engine::{CreateJobRequest, EngineError, MigrationEngine};
pub use registry::{InvalidStateError, JobMutation, JobRegistry, RegistryError};
pub use sources::{JsonFileConnector, MemoryConnector, JSON_FILE_SYSTEM, MEMORY_SYSTEM};
