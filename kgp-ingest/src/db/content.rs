//! Content record and review decision persistence
//!
//! Status changes are compare-and-set against the status and flag the caller
//! observed, and the decision describing a change is written in the same
//! transaction, so a record never shows a status without its decision.

use async_trait::async_trait;
use chrono::Utc;
use kgp_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_column, parse_timestamp};
use crate::admission::duplicate::{ContentCorpus, CorpusEntry};
use crate::models::{ContentRecord, ContentStatus, ValidationDecision};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const RECORD_COLUMNS: &str = "id, title, description, category, region, tags, attachments, \
     origin, external_ref, quality_score, quality_issues, duplicate_score, fingerprint, \
     status, flagged, author, created_at";

/// Listing filter; unset fields match everything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentFilter {
    pub status: Option<ContentStatus>,
    pub flagged: Option<bool>,
}

/// Guarded status change
#[derive(Debug, Clone)]
pub struct StatusChange<'a> {
    pub content_id: Uuid,
    pub expected_status: ContentStatus,
    pub expected_flagged: bool,
    pub new_status: ContentStatus,
    pub new_flagged: bool,
    /// Written atomically with the change when present
    pub decision: Option<&'a ValidationDecision>,
}

#[derive(Clone)]
pub struct ContentStore {
    pool: SqlitePool,
}

impl ContentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a freshly admitted record
    pub async fn insert(&self, record: &ContentRecord) -> Result<()> {
        let id = record.id.to_string();
        let tags = serde_json::to_string(&record.tags)?;
        let attachments = serde_json::to_string(&record.attachments)?;
        let quality_issues = serde_json::to_string(&record.quality_issues)?;
        let created_at = record.created_at.to_rfc3339();

        retry_on_lock("content_insert", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            sqlx::query(
                r#"
                INSERT INTO content_records (
                    id, title, description, category, region, tags, attachments,
                    origin, external_ref, quality_score, quality_issues, duplicate_score,
                    fingerprint, status, flagged, author, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&record.title)
            .bind(&record.description)
            .bind(record.category.as_str())
            .bind(&record.region)
            .bind(&tags)
            .bind(&attachments)
            .bind(record.origin.as_str())
            .bind(&record.external_ref)
            .bind(record.quality_score as i64)
            .bind(&quality_issues)
            .bind(record.duplicate_score)
            .bind(&record.fingerprint)
            .bind(record.status.as_str())
            .bind(record.flagged)
            .bind(&record.author)
            .bind(&created_at)
            .bind(&created_at)
            .execute(&self.pool)
            .await?;
            Ok::<(), kgp_common::Error>(())
        })
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ContentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content_records WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Records matching `filter`, oldest first
    pub async fn list(&self, filter: ContentFilter) -> Result<Vec<ContentRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM content_records
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR flagged = ?2)
            ORDER BY created_at, rowid
            "#,
            RECORD_COLUMNS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.flagged)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Apply a guarded status change
    ///
    /// Returns false, leaving everything untouched, when the record no
    /// longer has the expected status and flag.
    pub async fn apply_change(&self, change: StatusChange<'_>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE content_records
            SET status = ?, flagged = ?, updated_at = ?
            WHERE id = ? AND status = ? AND flagged = ?
            "#,
        )
        .bind(change.new_status.as_str())
        .bind(change.new_flagged)
        .bind(Utc::now().to_rfc3339())
        .bind(change.content_id.to_string())
        .bind(change.expected_status.as_str())
        .bind(change.expected_flagged)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(decision) = change.decision {
            sqlx::query(
                r#"
                INSERT INTO validation_decisions (
                    id, content_id, reviewer, action, resulting_status, notes, priority, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(decision.id.to_string())
            .bind(decision.content_id.to_string())
            .bind(&decision.reviewer)
            .bind(&decision.action)
            .bind(decision.resulting_status.as_str())
            .bind(&decision.notes)
            .bind(decision.priority.as_str())
            .bind(decision.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Decisions recorded against a record, oldest first
    pub async fn decisions_for(&self, content_id: Uuid) -> Result<Vec<ValidationDecision>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content_id, reviewer, action, resulting_status, notes, priority, created_at
            FROM validation_decisions
            WHERE content_id = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(content_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ValidationDecision> {
                let resulting_status: String = row.get("resulting_status");
                let priority: String = row.get("priority");
                let created_at: String = row.get("created_at");
                Ok(ValidationDecision {
                    id: parse_uuid(row.get("id"))?,
                    content_id: parse_uuid(row.get("content_id"))?,
                    reviewer: row.get("reviewer"),
                    action: row.get("action"),
                    resulting_status: parse_column(&resulting_status)?,
                    notes: row.get("notes"),
                    priority: parse_column(&priority)?,
                    created_at: parse_timestamp(&created_at, "created_at")?,
                })
            })
            .collect()
    }

    fn active_clause() -> String {
        ContentStatus::ACTIVE
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
impl ContentCorpus for ContentStore {
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CorpusEntry>> {
        let row = sqlx::query(&format!(
            "SELECT id, title, description FROM content_records \
             WHERE fingerprint = ? AND status IN ({}) ORDER BY created_at LIMIT 1",
            Self::active_clause()
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn active_entries(&self) -> Result<Vec<CorpusEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT id, title, description FROM content_records WHERE status IN ({})",
            Self::active_clause()
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }
}

fn parse_uuid(value: String) -> Result<Uuid> {
    Uuid::parse_str(&value)
        .map_err(|e| kgp_common::Error::Internal(format!("Invalid id '{}': {}", value, e)))
}

fn row_to_entry(row: &SqliteRow) -> Result<CorpusEntry> {
    Ok(CorpusEntry {
        id: parse_uuid(row.get("id"))?,
        title: row.get("title"),
        description: row.get("description"),
    })
}

fn row_to_record(row: &SqliteRow) -> Result<ContentRecord> {
    let category: String = row.get("category");
    let origin: String = row.get("origin");
    let status: String = row.get("status");
    let tags: String = row.get("tags");
    let attachments: String = row.get("attachments");
    let quality_issues: String = row.get("quality_issues");
    let created_at: String = row.get("created_at");
    let quality_score: i64 = row.get("quality_score");

    Ok(ContentRecord {
        id: parse_uuid(row.get("id"))?,
        title: row.get("title"),
        description: row.get("description"),
        category: parse_column(&category)?,
        region: row.get("region"),
        tags: serde_json::from_str(&tags)?,
        attachments: serde_json::from_str(&attachments)?,
        origin: parse_column(&origin)?,
        external_ref: row.get("external_ref"),
        quality_score: quality_score.clamp(0, 100) as u8,
        quality_issues: serde_json::from_str(&quality_issues)?,
        duplicate_score: row.get("duplicate_score"),
        fingerprint: row.get("fingerprint"),
        status: parse_column(&status)?,
        flagged: row.get("flagged"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        author: row.get("author"),
    })
}
