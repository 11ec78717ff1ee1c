//! SQLite-backed audit sink

use async_trait::async_trait;
use chrono::Utc;
use kgp_common::Result;
use sqlx::{Row, SqlitePool};

use super::parse_timestamp;
use crate::audit::{AuditEntry, AuditSink};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Appends to the `audit_log` table and mirrors each entry to the log
#[derive(Clone)]
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Entries for one target, oldest first
    pub async fn entries_for(&self, target: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, action, actor, target, details, created_at
            FROM audit_log
            WHERE target = ?
            ORDER BY id
            "#,
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AuditEntry> {
                let details: String = row.get("details");
                let created_at: String = row.get("created_at");
                Ok(AuditEntry {
                    id: row.get("id"),
                    action: row.get("action"),
                    actor: row.get("actor"),
                    target: row.get("target"),
                    details: serde_json::from_str(&details)?,
                    created_at: parse_timestamp(&created_at, "created_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(
        &self,
        action: &str,
        actor: &str,
        target: &str,
        details: serde_json::Value,
    ) -> Result<()> {
        tracing::info!(action, actor, target, %details, "audit");

        let details = details.to_string();
        let created_at = Utc::now().to_rfc3339();

        retry_on_lock("audit_record", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            sqlx::query(
                "INSERT INTO audit_log (action, actor, target, details, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(action)
            .bind(actor)
            .bind(target)
            .bind(&details)
            .bind(&created_at)
            .execute(&self.pool)
            .await?;
            Ok::<(), kgp_common::Error>(())
        })
        .await
    }
}
