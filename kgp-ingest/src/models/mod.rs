//! Data models for kgp-ingest
//!
//! - Content records and admission candidates
//! - Review decisions
//! - Migration job state machine
//! - Tunable parameters

pub mod content;
pub mod decision;
pub mod migration_job;
pub mod parameters;

pub use content::{AttachmentRef, Category, ContentRecord, ContentStatus, Origin, RawCandidate};
pub use decision::{Priority, ValidationDecision};
pub use migration_job::{
    JobLogEntry, JobProgress, JobStatus, LogLevel, MigrationConfig, MigrationJob, MigrationTarget,
    SourceDescriptor,
};
pub use parameters::{AdmissionParameters, EngineParameters};
