//! Migration job state machine
//!
//! A job progresses PENDING → IN_PROGRESS → {COMPLETED, FAILED, CANCELLED}.
//! CANCELLED is also reachable straight from PENDING.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Migration job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet started
    Pending,
    /// Processing loop is running
    InProgress,
    /// Source exhausted
    Completed,
    /// Source unreachable, invalid configuration, or storage fault
    Failed,
    /// Cancelled by request (partial progress retained)
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// External system a job reads from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Connector name, e.g. "json-file"
    pub system: String,
    /// Opaque connection parameters interpreted by the connector
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl SourceDescriptor {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// Destination of a job; always this system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationTarget {
    #[default]
    Local,
}

/// Per-job processing options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Records pulled from the source per batch (default: 50)
    #[serde(default = "default_batch_size", alias = "batchSize")]
    pub batch_size: usize,

    /// Enforce the quality floor, routing low scorers to triage (default: true)
    #[serde(default = "default_true", alias = "validateBeforeImport")]
    pub validate_before_import: bool,

    /// Reject near-duplicates instead of importing them flagged (default: true)
    #[serde(default = "default_true", alias = "skipDuplicates")]
    pub skip_duplicates: bool,
}

fn default_batch_size() -> usize {
    50
}

fn default_true() -> bool {
    true
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            validate_before_import: true,
            skip_duplicates: true,
        }
    }
}

/// Aggregate counters; `processed == succeeded + failed` always holds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Unknown until the source reports a count
    pub total: Option<u64>,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl JobProgress {
    /// Set the total once; later reports are ignored
    pub fn set_total(&mut self, total: u64) -> bool {
        if self.total.is_some() {
            return false;
        }
        self.total = Some(total);
        true
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
        self.processed = self.succeeded + self.failed;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
        self.processed = self.succeeded + self.failed;
    }

    /// Percentage complete (0.0 - 100.0), None while the total is unknown
    pub fn percentage(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some((self.processed as f64 / total as f64 * 100.0).min(100.0)),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One line of a job's log trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl JobLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }
}

/// Bulk-import unit of work
///
/// The job keeps counters and a log trail only; records it creates are owned
/// independently and never referenced from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationJob {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub source: SourceDescriptor,
    pub target: MigrationTarget,
    pub status: JobStatus,
    pub config: MigrationConfig,
    pub progress: JobProgress,
    pub logs: Vec<JobLogEntry>,
    pub initiator: String,
    /// Set by `cancel` while in progress; read by the loop between batches
    pub cancel_requested: bool,
    /// Systemic fault that ended the job
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationJob {
    /// Create new job in PENDING
    pub fn new(
        name: String,
        description: String,
        source: SourceDescriptor,
        config: MigrationConfig,
        initiator: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            description,
            source,
            target: MigrationTarget::Local,
            status: JobStatus::Pending,
            config,
            progress: JobProgress::default(),
            logs: Vec::new(),
            initiator,
            cancel_requested: false,
            failure: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Transition to new status
    ///
    /// Stamps `started_at` on entering IN_PROGRESS and `completed_at` on
    /// entering a terminal status. Legality is checked by the caller.
    pub fn transition_to(&mut self, new_status: JobStatus) {
        let now = Utc::now();
        self.status = new_status;

        match new_status {
            JobStatus::InProgress => self.started_at = Some(now),
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed => {
                self.completed_at = Some(now);
            }
            JobStatus::Pending => {}
        }
    }

    pub fn log(&mut self, entry: JobLogEntry) {
        self.logs.push(entry);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds between start and completion (or now while running)
    pub fn elapsed_seconds(&self) -> u64 {
        match self.started_at {
            Some(start) => {
                let end = self.completed_at.unwrap_or_else(Utc::now);
                (end - start).num_seconds().max(0) as u64
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> MigrationJob {
        MigrationJob::new(
            "wiki import".to_string(),
            String::new(),
            SourceDescriptor::new("memory"),
            MigrationConfig::default(),
            "alice".to_string(),
        )
    }

    #[test]
    fn test_new_job_is_pending_without_timestamps() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
        assert_eq!(job.progress, JobProgress::default());
    }

    #[test]
    fn test_transitions_stamp_times() {
        let mut job = job();
        job.transition_to(JobStatus::InProgress);
        assert_eq!(job.status, JobStatus::InProgress);
        assert!(job.started_at.is_some());
        assert!(!job.is_terminal());

        job.transition_to(JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert!(job.is_terminal());
    }

    #[test]
    fn test_progress_keeps_processed_in_sync() {
        let mut progress = JobProgress::default();
        progress.record_success();
        progress.record_failure();
        progress.record_success();
        assert_eq!(progress.processed, 3);
        assert_eq!(progress.processed, progress.succeeded + progress.failed);
    }

    #[test]
    fn test_total_set_only_once() {
        let mut progress = JobProgress::default();
        assert_eq!(progress.percentage(), None);
        assert!(progress.set_total(4));
        assert!(!progress.set_total(10));
        assert_eq!(progress.total, Some(4));

        progress.record_success();
        assert_eq!(progress.percentage(), Some(25.0));
    }

    #[test]
    fn test_config_accepts_camel_case_aliases() {
        let config: MigrationConfig = serde_json::from_str(
            r#"{"batchSize": 2, "validateBeforeImport": false, "skipDuplicates": false}"#,
        )
        .unwrap();
        assert_eq!(config.batch_size, 2);
        assert!(!config.validate_before_import);
        assert!(!config.skip_duplicates);

        let defaults: MigrationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults, MigrationConfig::default());
    }
}
