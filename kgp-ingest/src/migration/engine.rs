//! Migration Job Engine
//!
//! Each started job runs its own background loop. Within a job, batches and
//! the records in them are processed strictly in order, so the duplicate
//! check sees everything the same run admitted before.
//!
//! Cancellation is cooperative: the loop checks once per batch, before
//! pulling it, whether the job's `cancel_requested` flag is set in the
//! registry (or the engine is shutting down). Admission code never sees
//! cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kgp_common::events::{EventBus, KgpEvent};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::connector::{ConnectorFault, ConnectorRegistry, SourceHandle};
use super::registry::{InvalidStateError, JobRegistry, RegistryError};
use crate::admission::{Admission, AdmitOptions, GateFault, Rejection, ValidationError};
use crate::audit::{job_target, record_or_warn, AuditSink};
use crate::governance::{Actor, Capability, GovernanceWorkflow};
use crate::models::{
    EngineParameters, JobLogEntry, JobProgress, JobStatus, MigrationConfig, MigrationJob,
    RawCandidate, SourceDescriptor,
};

const SYSTEM_ACTOR: &str = "system";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("migration job {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Forbidden(String),

    /// Registry unavailable at a start/cancel boundary
    #[error("job registry unavailable: {0}")]
    Registry(kgp_common::Error),
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => EngineError::NotFound(id),
            RegistryError::InvalidState(e) => EngineError::InvalidState(e),
            RegistryError::Fault(e) => EngineError::Registry(e),
        }
    }
}

/// Systemic fault that ends a run as Failed
#[derive(Debug, Error)]
enum JobFault {
    #[error("invalid job configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Connector(#[from] ConnectorFault),

    #[error("admission gate fault: {0}")]
    Gate(#[from] GateFault),

    #[error("content store fault: {0}")]
    Store(kgp_common::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// How a loop that did not fault ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopEnd {
    Exhausted,
    CancelRequested,
    Shutdown,
}

/// Job definition as submitted by an administrator
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source: SourceDescriptor,
    #[serde(default, alias = "migrationConfig")]
    pub migration_config: MigrationConfig,
}

/// Run-local state owned by one job's loop
struct JobRun {
    job_id: Uuid,
    initiator: String,
    config: MigrationConfig,
    source: SourceDescriptor,
    progress: JobProgress,
    pending_logs: Vec<JobLogEntry>,
}

impl JobRun {
    fn log(&mut self, entry: JobLogEntry) {
        self.pending_logs.push(entry);
    }
}

#[derive(Clone)]
pub struct MigrationEngine {
    registry: Arc<dyn JobRegistry>,
    connectors: Arc<ConnectorRegistry>,
    workflow: GovernanceWorkflow,
    audit: Arc<dyn AuditSink>,
    event_bus: EventBus,
    params: EngineParameters,
    /// Tokens of loops running in this process
    cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl MigrationEngine {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        connectors: ConnectorRegistry,
        workflow: GovernanceWorkflow,
        audit: Arc<dyn AuditSink>,
        event_bus: EventBus,
        params: EngineParameters,
    ) -> Self {
        Self {
            registry,
            connectors: Arc::new(connectors),
            workflow,
            audit,
            event_bus,
            params,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    /// Create a job in Pending
    pub async fn create_job(
        &self,
        request: CreateJobRequest,
        actor: &Actor,
    ) -> Result<MigrationJob, EngineError> {
        require_migrate(actor)?;

        let name = request.name.trim().to_string();
        let system = request.source.system.trim().to_string();
        let mut violations = Vec::new();
        if name.is_empty() {
            violations.push(crate::admission::FieldViolation::new("name", "is required"));
        }
        if system.is_empty() {
            violations.push(crate::admission::FieldViolation::new(
                "source.system",
                "is required",
            ));
        }
        if !violations.is_empty() {
            return Err(ValidationError { violations }.into());
        }

        let source = SourceDescriptor {
            system,
            parameters: request.source.parameters,
        };
        let job = MigrationJob::new(
            name,
            request.description,
            source,
            request.migration_config,
            actor.id.clone(),
        );
        let job = self.registry.create(job).await?;

        info!(job_id = %job.id, name = %job.name, system = %job.source.system, "Migration job created");
        record_or_warn(
            self.audit.as_ref(),
            "job_create",
            &actor.id,
            &job_target(job.id),
            json!({ "name": job.name, "source": job.source.system }),
        )
        .await;

        Ok(job)
    }

    /// Pending → InProgress, then process asynchronously
    pub async fn start(&self, job_id: Uuid, actor: &Actor) -> Result<MigrationJob, EngineError> {
        require_migrate(actor)?;

        let started_by = actor.id.clone();
        let job = self
            .registry
            .update(
                job_id,
                Box::new(move |job: &mut MigrationJob| -> Result<(), InvalidStateError> {
                    if job.status != JobStatus::Pending {
                        return Err(InvalidStateError {
                            job_id: job.id,
                            status: job.status,
                            operation: "start",
                        });
                    }
                    job.transition_to(JobStatus::InProgress);
                    job.log(JobLogEntry::info(format!("job started by {}", started_by)));
                    Ok(())
                }),
            )
            .await?;

        info!(job_id = %job_id, actor = %actor.id, "Migration job started");
        record_or_warn(
            self.audit.as_ref(),
            "job_start",
            &actor.id,
            &job_target(job_id),
            json!({ "source": job.source.system, "batch_size": job.config.batch_size }),
        )
        .await;
        self.event_bus.emit_lossy(KgpEvent::JobStarted {
            job_id,
            name: job.name.clone(),
            timestamp: Utc::now(),
        });

        let token = self.shutdown.child_token();
        self.cancellation_tokens
            .write()
            .await
            .insert(job_id, token.clone());

        let engine = self.clone();
        let snapshot = job.clone();
        tokio::spawn(async move {
            debug!(job_id = %job_id, "Migration loop task started");
            engine.run(snapshot, token).await;
            engine.cancellation_tokens.write().await.remove(&job_id);
            debug!(job_id = %job_id, "Migration loop task finished");
        });

        Ok(job)
    }

    /// Cancel a pending job immediately, or ask a running one to stop
    ///
    /// A running job settles as Cancelled once its in-flight batch drains.
    pub async fn cancel(&self, job_id: Uuid, actor: &Actor) -> Result<MigrationJob, EngineError> {
        require_migrate(actor)?;

        let cancelled_by = actor.id.clone();
        let job = self
            .registry
            .update(
                job_id,
                Box::new(move |job: &mut MigrationJob| -> Result<(), InvalidStateError> {
                    match job.status {
                        JobStatus::Pending => {
                            job.transition_to(JobStatus::Cancelled);
                            job.log(JobLogEntry::info(format!(
                                "job cancelled by {} before starting",
                                cancelled_by
                            )));
                            Ok(())
                        }
                        JobStatus::InProgress => {
                            if !job.cancel_requested {
                                job.cancel_requested = true;
                                job.log(JobLogEntry::info(format!(
                                    "cancellation requested by {}",
                                    cancelled_by
                                )));
                            }
                            Ok(())
                        }
                        status => Err(InvalidStateError {
                            job_id: job.id,
                            status,
                            operation: "cancel",
                        }),
                    }
                }),
            )
            .await?;

        if job.status == JobStatus::Cancelled {
            info!(job_id = %job_id, actor = %actor.id, "Pending migration job cancelled");
            record_or_warn(
                self.audit.as_ref(),
                "job_cancel",
                &actor.id,
                &job_target(job_id),
                json!({ "status": job.status.as_str(), "processed": 0 }),
            )
            .await;
            self.event_bus.emit_lossy(KgpEvent::JobCancelled {
                job_id,
                processed: 0,
                timestamp: Utc::now(),
            });
        } else {
            info!(job_id = %job_id, actor = %actor.id, "Migration job cancellation requested");
            record_or_warn(
                self.audit.as_ref(),
                "job_cancel_request",
                &actor.id,
                &job_target(job_id),
                json!({ "status": job.status.as_str(), "processed": job.progress.processed }),
            )
            .await;
        }

        Ok(job)
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<MigrationJob, EngineError> {
        Ok(self.registry.get(job_id).await?)
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<MigrationJob>, EngineError> {
        Ok(self.registry.list(status).await?)
    }

    /// Whether a loop for this job is running in this process
    pub async fn is_running(&self, job_id: Uuid) -> bool {
        self.cancellation_tokens.read().await.contains_key(&job_id)
    }

    /// Settle jobs a previous process left InProgress as Cancelled
    pub async fn recover_interrupted_jobs(&self) -> Result<usize, EngineError> {
        let stale = self.registry.list(Some(JobStatus::InProgress)).await?;
        let mut recovered = 0;

        for job in stale {
            if self.is_running(job.id).await {
                continue;
            }

            let result = self
                .registry
                .update(
                    job.id,
                    Box::new(|job: &mut MigrationJob| -> Result<(), InvalidStateError> {
                        if job.status == JobStatus::InProgress {
                            job.transition_to(JobStatus::Cancelled);
                            job.log(JobLogEntry::warn("interrupted by service restart"));
                        }
                        Ok(())
                    }),
                )
                .await;

            match result {
                Ok(job) if job.status == JobStatus::Cancelled => {
                    warn!(
                        job_id = %job.id,
                        processed = job.progress.processed,
                        "Migration job interrupted by restart marked cancelled"
                    );
                    record_or_warn(
                        self.audit.as_ref(),
                        "job_cancelled",
                        SYSTEM_ACTOR,
                        &job_target(job.id),
                        json!({ "reason": "interrupted by service restart", "processed": job.progress.processed }),
                    )
                    .await;
                    recovered += 1;
                }
                Ok(_) => {}
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to recover interrupted job"),
            }
        }

        if recovered > 0 {
            info!("Recovered {} interrupted migration job(s)", recovered);
        }
        Ok(recovered)
    }

    /// Stop every running loop at its next batch boundary and wait for them
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        loop {
            let remaining = self.cancellation_tokens.read().await.len();
            if remaining == 0 {
                info!("All migration loops stopped");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining, "Migration loops still running after shutdown grace period");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    // ------------------------------------------------------------------
    // Processing loop
    // ------------------------------------------------------------------

    async fn run(&self, job: MigrationJob, token: CancellationToken) {
        let mut run = JobRun {
            job_id: job.id,
            initiator: job.initiator.clone(),
            config: job.config.clone(),
            source: job.source.clone(),
            progress: job.progress.clone(),
            pending_logs: Vec::new(),
        };

        let outcome = self.drive(&mut run, &token).await;
        self.finish(run, outcome).await;
    }

    async fn drive(&self, run: &mut JobRun, token: &CancellationToken) -> Result<LoopEnd, JobFault> {
        if run.config.batch_size == 0 || run.config.batch_size > self.params.max_batch_size {
            return Err(JobFault::Config(format!(
                "batch_size must be within 1-{}, got {}",
                self.params.max_batch_size, run.config.batch_size
            )));
        }

        let connector = self.connectors.resolve(&run.source.system)?;
        let mut handle = connector.open(&run.source).await?;

        let result = self.drive_batches(run, handle.as_mut(), token).await;

        if let Err(e) = handle.close().await {
            warn!(job_id = %run.job_id, error = %e, "Failed to close source handle");
        }
        result
    }

    async fn drive_batches(
        &self,
        run: &mut JobRun,
        handle: &mut dyn SourceHandle,
        token: &CancellationToken,
    ) -> Result<LoopEnd, JobFault> {
        if let Some(total) = handle.estimate_total().await? {
            if run.progress.set_total(total) {
                run.log(JobLogEntry::info(format!("source reports {} records", total)));
                self.flush(run).await?;
            }
        }

        let options = AdmitOptions::for_migration(&run.config, run.initiator.clone());
        let mut batch_number = 0u64;

        loop {
            // The single cancellation check point for this batch
            if token.is_cancelled() {
                return Ok(LoopEnd::Shutdown);
            }
            if self.registry.get(run.job_id).await?.cancel_requested {
                return Ok(LoopEnd::CancelRequested);
            }

            let batch = match handle.next_batch(run.config.batch_size).await? {
                Some(batch) if !batch.is_empty() => batch,
                _ => return Ok(LoopEnd::Exhausted),
            };
            batch_number += 1;

            debug!(job_id = %run.job_id, batch = batch_number, size = batch.len(), "Processing batch");

            for candidate in &batch {
                self.admit_one(run, candidate, &options).await?;
            }

            self.flush(run).await?;
        }
    }

    /// Admit one record; only systemic faults escape
    async fn admit_one(
        &self,
        run: &mut JobRun,
        candidate: &RawCandidate,
        options: &AdmitOptions,
    ) -> Result<(), JobFault> {
        let label = candidate.label();

        match self.workflow.gate().admit(candidate, options).await? {
            Admission::Accepted(record) => {
                let record = self
                    .workflow
                    .accept(record, &run.initiator)
                    .await
                    .map_err(JobFault::Store)?;
                run.progress.record_success();
                run.log(JobLogEntry::info(format!("admitted {} as {}", label, record.id)));
            }
            Admission::Flagged { record, reasons } => {
                let record = self
                    .workflow
                    .accept(record, &run.initiator)
                    .await
                    .map_err(JobFault::Store)?;
                run.progress.record_success();
                run.log(JobLogEntry::info(format!(
                    "admitted {} as {} (flagged: {})",
                    label,
                    record.id,
                    reasons.join("; ")
                )));
            }
            Admission::Rejected(Rejection::Validation(e)) => {
                run.progress.record_failure();
                run.log(JobLogEntry::error(format!("rejected {}: {}", label, e)));
            }
            Admission::Rejected(Rejection::Duplicate(e)) => {
                run.progress.record_failure();
                let nearest: Vec<String> = e
                    .matches
                    .iter()
                    .map(|m| format!("{} \"{}\" ({:.2})", m.content_id, m.title, m.score))
                    .collect();
                run.log(JobLogEntry::warn(format!(
                    "skipped {}: {}; nearest: {}",
                    label,
                    e,
                    nearest.join(", ")
                )));
            }
        }

        Ok(())
    }

    /// Write progress and buffered logs, then publish progress
    async fn flush(&self, run: &mut JobRun) -> Result<(), JobFault> {
        let progress = run.progress.clone();
        let logs = std::mem::take(&mut run.pending_logs);

        self.registry
            .update(
                run.job_id,
                Box::new(move |job: &mut MigrationJob| -> Result<(), InvalidStateError> {
                    job.progress = progress;
                    job.logs.extend(logs);
                    Ok(())
                }),
            )
            .await?;

        self.event_bus.emit_lossy(KgpEvent::JobProgress {
            job_id: run.job_id,
            total: run.progress.total,
            processed: run.progress.processed,
            succeeded: run.progress.succeeded,
            failed: run.progress.failed,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record the terminal status with whatever progress was made
    async fn finish(&self, mut run: JobRun, outcome: Result<LoopEnd, JobFault>) {
        let job_id = run.job_id;

        let failure = match &outcome {
            Ok(LoopEnd::Exhausted) => None,
            Ok(LoopEnd::CancelRequested) => {
                run.log(JobLogEntry::info("cancelled at batch boundary"));
                None
            }
            Ok(LoopEnd::Shutdown) => {
                run.log(JobLogEntry::warn("cancelled by service shutdown"));
                None
            }
            Err(fault) => {
                error!(job_id = %job_id, error = %fault, "Migration job failed");
                run.log(JobLogEntry::error(format!("job failed: {}", fault)));
                Some(fault.to_string())
            }
        };
        let end = outcome.ok();

        let progress = run.progress.clone();
        let logs = std::mem::take(&mut run.pending_logs);
        let failure_for_job = failure.clone();

        let result = self
            .registry
            .update(
                job_id,
                Box::new(move |job: &mut MigrationJob| -> Result<(), InvalidStateError> {
                    job.progress = progress;
                    job.logs.extend(logs);

                    let status = match end {
                        None => JobStatus::Failed,
                        Some(LoopEnd::CancelRequested) | Some(LoopEnd::Shutdown) => {
                            JobStatus::Cancelled
                        }
                        // A cancel that raced the last batch still wins
                        Some(LoopEnd::Exhausted) if job.cancel_requested => JobStatus::Cancelled,
                        Some(LoopEnd::Exhausted) => JobStatus::Completed,
                    };
                    job.failure = failure_for_job;
                    job.transition_to(status);
                    job.log(JobLogEntry::info(format!("job {}", status)));
                    Ok(())
                }),
            )
            .await;

        let job = match result {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to record terminal job status");
                return;
            }
        };

        let progress = &job.progress;
        let now = Utc::now();
        let event = match job.status {
            JobStatus::Completed => {
                info!(
                    job_id = %job_id,
                    processed = progress.processed,
                    succeeded = progress.succeeded,
                    failed = progress.failed,
                    "Migration job completed"
                );
                KgpEvent::JobCompleted {
                    job_id,
                    succeeded: progress.succeeded,
                    failed: progress.failed,
                    duration_seconds: job.elapsed_seconds(),
                    timestamp: now,
                }
            }
            JobStatus::Failed => KgpEvent::JobFailed {
                job_id,
                error_message: failure.clone().unwrap_or_default(),
                processed: progress.processed,
                timestamp: now,
            },
            _ => {
                info!(job_id = %job_id, processed = progress.processed, "Migration job cancelled");
                KgpEvent::JobCancelled {
                    job_id,
                    processed: progress.processed,
                    timestamp: now,
                }
            }
        };

        record_or_warn(
            self.audit.as_ref(),
            &format!("job_{}", job.status),
            SYSTEM_ACTOR,
            &job_target(job_id),
            json!({
                "processed": progress.processed,
                "succeeded": progress.succeeded,
                "failed": progress.failed,
                "failure": failure,
            }),
        )
        .await;
        self.event_bus.emit_lossy(event);
    }
}

fn require_migrate(actor: &Actor) -> Result<(), EngineError> {
    if actor.has(Capability::Migrate) {
        Ok(())
    } else {
        Err(EngineError::Forbidden(format!(
            "actor '{}' lacks the migrate capability",
            actor.id
        )))
    }
}
