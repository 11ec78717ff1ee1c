//! Job Registry contract
//!
//! The registry is the single serialization point for job state. Every
//! change, whether from the processing loop or a caller's `cancel`, goes
//! through [`JobRegistry::update`], an atomic read-modify-write of one job.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{JobStatus, MigrationJob};

/// Operation illegal for the job's current status
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {operation} migration job {job_id} in status {status}")]
pub struct InvalidStateError {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub operation: &'static str,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("migration job {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    /// Persistence unavailable
    #[error("job registry unavailable: {0}")]
    Fault(#[from] kgp_common::Error),
}

/// Mutation applied inside an atomic update; returning an error aborts it
pub type JobMutation = Box<dyn FnOnce(&mut MigrationJob) -> Result<(), InvalidStateError> + Send>;

#[async_trait]
pub trait JobRegistry: Send + Sync {
    async fn create(&self, job: MigrationJob) -> Result<MigrationJob, RegistryError>;

    async fn get(&self, id: Uuid) -> Result<MigrationJob, RegistryError>;

    /// Read, mutate, and write back one job atomically
    async fn update(&self, id: Uuid, mutation: JobMutation) -> Result<MigrationJob, RegistryError>;

    /// Jobs with the given status (all when None), newest first
    async fn list(&self, status: Option<JobStatus>) -> Result<Vec<MigrationJob>, RegistryError>;
}
