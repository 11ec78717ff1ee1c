//! Migration job persistence (Job Registry)

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{parse_column, parse_timestamp};
use crate::migration::registry::{JobMutation, JobRegistry, RegistryError};
use crate::models::{JobProgress, JobStatus, MigrationJob};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const JOB_COLUMNS: &str = "id, name, description, source, target, status, config, \
     progress_total, progress_processed, progress_succeeded, progress_failed, logs, \
     initiator, cancel_requested, failure, created_at, started_at, completed_at";

/// Job Registry over the `migration_jobs` table
///
/// Updates are serialized in-process by `write_lock` and run inside a single
/// transaction, so a `cancel` and a progress write never lose each other.
#[derive(Clone)]
pub struct SqliteJobRegistry {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteJobRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl JobRegistry for SqliteJobRegistry {
    async fn create(&self, job: MigrationJob) -> Result<MigrationJob, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let columns = JobColumns::encode(&job)?;

        retry_on_lock("job_create", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            sqlx::query(&format!(
                "INSERT INTO migration_jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                JOB_COLUMNS
            ))
            .bind(&columns.id)
            .bind(&job.name)
            .bind(&job.description)
            .bind(&columns.source)
            .bind(&columns.target)
            .bind(job.status.as_str())
            .bind(&columns.config)
            .bind(columns.total)
            .bind(columns.processed)
            .bind(columns.succeeded)
            .bind(columns.failed)
            .bind(&columns.logs)
            .bind(&job.initiator)
            .bind(job.cancel_requested)
            .bind(&job.failure)
            .bind(&columns.created_at)
            .bind(&columns.started_at)
            .bind(&columns.completed_at)
            .execute(&self.pool)
            .await?;
            Ok::<(), kgp_common::Error>(())
        })
        .await?;

        tracing::debug!(job_id = %job.id, name = %job.name, "Migration job created");
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<MigrationJob, RegistryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM migration_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(kgp_common::Error::from)?;

        match row {
            Some(row) => Ok(row_to_job(&row)?),
            None => Err(RegistryError::NotFound(id)),
        }
    }

    async fn update(&self, id: Uuid, mutation: JobMutation) -> Result<MigrationJob, RegistryError> {
        let _guard = self.write_lock.lock().await;

        let mut tx = self.pool.begin().await.map_err(kgp_common::Error::from)?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM migration_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(kgp_common::Error::from)?;

        let mut job = match row {
            Some(row) => row_to_job(&row)?,
            None => return Err(RegistryError::NotFound(id)),
        };

        // Dropping `tx` on the error path rolls it back
        mutation(&mut job)?;

        write_job(&mut tx, &job).await?;
        tx.commit().await.map_err(kgp_common::Error::from)?;

        Ok(job)
    }

    async fn list(&self, status: Option<JobStatus>) -> Result<Vec<MigrationJob>, RegistryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM migration_jobs WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC, rowid DESC",
            JOB_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(kgp_common::Error::from)?;

        Ok(rows
            .iter()
            .map(row_to_job)
            .collect::<kgp_common::Result<Vec<_>>>()?)
    }
}

/// Column values that need encoding before binding
struct JobColumns {
    id: String,
    source: String,
    target: String,
    config: String,
    logs: String,
    total: Option<i64>,
    processed: i64,
    succeeded: i64,
    failed: i64,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl JobColumns {
    fn encode(job: &MigrationJob) -> kgp_common::Result<Self> {
        Ok(Self {
            id: job.id.to_string(),
            source: serde_json::to_string(&job.source)?,
            target: serde_json::to_string(&job.target)?,
            config: serde_json::to_string(&job.config)?,
            logs: serde_json::to_string(&job.logs)?,
            total: job.progress.total.map(|t| t as i64),
            processed: job.progress.processed as i64,
            succeeded: job.progress.succeeded as i64,
            failed: job.progress.failed as i64,
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        })
    }
}

async fn write_job(tx: &mut Transaction<'_, Sqlite>, job: &MigrationJob) -> kgp_common::Result<()> {
    let columns = JobColumns::encode(job)?;

    sqlx::query(
        r#"
        UPDATE migration_jobs SET
            status = ?,
            progress_total = ?,
            progress_processed = ?,
            progress_succeeded = ?,
            progress_failed = ?,
            logs = ?,
            cancel_requested = ?,
            failure = ?,
            started_at = ?,
            completed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(job.status.as_str())
    .bind(columns.total)
    .bind(columns.processed)
    .bind(columns.succeeded)
    .bind(columns.failed)
    .bind(&columns.logs)
    .bind(job.cancel_requested)
    .bind(&job.failure)
    .bind(&columns.started_at)
    .bind(&columns.completed_at)
    .bind(&columns.id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn row_to_job(row: &SqliteRow) -> kgp_common::Result<MigrationJob> {
    let id: String = row.get("id");
    let source: String = row.get("source");
    let target: String = row.get("target");
    let status: String = row.get("status");
    let config: String = row.get("config");
    let logs: String = row.get("logs");
    let created_at: String = row.get("created_at");
    let started_at: Option<String> = row.get("started_at");
    let completed_at: Option<String> = row.get("completed_at");
    let total: Option<i64> = row.get("progress_total");

    Ok(MigrationJob {
        id: Uuid::parse_str(&id)
            .map_err(|e| kgp_common::Error::Internal(format!("Invalid job id '{}': {}", id, e)))?,
        name: row.get("name"),
        description: row.get("description"),
        source: serde_json::from_str(&source)?,
        target: serde_json::from_str(&target)?,
        status: parse_column(&status)?,
        config: serde_json::from_str(&config)?,
        progress: JobProgress {
            total: total.map(|t| t.max(0) as u64),
            processed: row.get::<i64, _>("progress_processed").max(0) as u64,
            succeeded: row.get::<i64, _>("progress_succeeded").max(0) as u64,
            failed: row.get::<i64, _>("progress_failed").max(0) as u64,
        },
        logs: serde_json::from_str(&logs)?,
        initiator: row.get("initiator"),
        cancel_requested: row.get("cancel_requested"),
        failure: row.get("failure"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        started_at: started_at
            .map(|s| parse_timestamp(&s, "started_at"))
            .transpose()?,
        completed_at: completed_at
            .map(|s| parse_timestamp(&s, "completed_at"))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::registry::InvalidStateError;
    use crate::models::{JobLogEntry, MigrationConfig, SourceDescriptor};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn registry() -> SqliteJobRegistry {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        SqliteJobRegistry::new(pool)
    }

    fn job(name: &str) -> MigrationJob {
        MigrationJob::new(
            name.to_string(),
            String::new(),
            SourceDescriptor::new("memory").with_parameter("dataset", "wiki"),
            MigrationConfig::default(),
            "ops".to_string(),
        )
    }

    #[tokio::test]
    async fn test_job_round_trips_through_table() {
        let registry = registry().await;
        let created = registry.create(job("wiki import")).await.unwrap();

        registry
            .update(
                created.id,
                Box::new(|job: &mut MigrationJob| -> Result<(), InvalidStateError> {
                    job.transition_to(JobStatus::InProgress);
                    job.progress.set_total(4);
                    job.progress.record_success();
                    job.progress.record_failure();
                    job.log(JobLogEntry::warn("skipped LEGACY-1"));
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let loaded = registry.get(created.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::InProgress);
        assert_eq!(loaded.source.parameter("dataset"), Some("wiki"));
        assert_eq!(loaded.progress.total, Some(4));
        assert_eq!(loaded.progress.processed, 2);
        assert_eq!(loaded.progress.failed, 1);
        assert_eq!(loaded.logs.len(), 1);
        assert_eq!(loaded.logs[0].message, "skipped LEGACY-1");
        assert!(loaded.started_at.is_some());
    }

    #[tokio::test]
    async fn test_rejected_mutation_leaves_row_unchanged() {
        let registry = registry().await;
        let created = registry.create(job("wiki import")).await.unwrap();

        let result = registry
            .update(
                created.id,
                Box::new(|job: &mut MigrationJob| -> Result<(), InvalidStateError> {
                    job.cancel_requested = true;
                    Err(InvalidStateError {
                        job_id: job.id,
                        status: job.status,
                        operation: "cancel",
                    })
                }),
            )
            .await;

        assert!(matches!(result, Err(RegistryError::InvalidState(_))));
        assert!(!registry.get(created.id).await.unwrap().cancel_requested);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let registry = registry().await;
        let id = Uuid::new_v4();

        assert!(matches!(registry.get(id).await, Err(RegistryError::NotFound(_))));
        let result = registry
            .update(
                id,
                Box::new(|_: &mut MigrationJob| -> Result<(), InvalidStateError> { Ok(()) }),
            )
            .await;
        assert!(matches!(result, Err(RegistryError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let registry = registry().await;
        let first = registry.create(job("first")).await.unwrap();
        registry.create(job("second")).await.unwrap();
        registry
            .update(
                first.id,
                Box::new(|job: &mut MigrationJob| -> Result<(), InvalidStateError> {
                    job.transition_to(JobStatus::Cancelled);
                    Ok(())
                }),
            )
            .await
            .unwrap();

        assert_eq!(registry.list(None).await.unwrap().len(), 2);
        let cancelled = registry.list(Some(JobStatus::Cancelled)).await.unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, first.id);
    }
}
