//! Database access for kgp-ingest
//!
//! Single SQLite file (`kgp.db`) in the root folder holding content records,
//! review decisions, migration jobs, the audit log, and settings.

pub mod audit;
pub mod content;
pub mod jobs;
pub mod settings;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

pub use audit::SqliteAuditSink;
pub use content::{ContentFilter, ContentStore, StatusChange};
pub use jobs::SqliteJobRegistry;

/// Open (creating if needed) the database and ensure all tables exist
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        tracing::info!("Initialized new database: {}", db_path.display());
    } else {
        tracing::info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets HTTP readers proceed while a job loop writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_records (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            region TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            attachments TEXT NOT NULL DEFAULT '[]',
            origin TEXT NOT NULL,
            external_ref TEXT,
            quality_score INTEGER NOT NULL,
            quality_issues TEXT NOT NULL DEFAULT '[]',
            duplicate_score REAL NOT NULL,
            fingerprint TEXT NOT NULL,
            status TEXT NOT NULL,
            flagged INTEGER NOT NULL DEFAULT 0,
            author TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_content_fingerprint ON content_records(fingerprint)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_content_status ON content_records(status, flagged)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS validation_decisions (
            id TEXT PRIMARY KEY,
            content_id TEXT NOT NULL REFERENCES content_records(id),
            reviewer TEXT NOT NULL,
            action TEXT NOT NULL,
            resulting_status TEXT NOT NULL,
            notes TEXT,
            priority TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_decisions_content ON validation_decisions(content_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migration_jobs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL,
            target TEXT NOT NULL,
            status TEXT NOT NULL,
            config TEXT NOT NULL,
            progress_total INTEGER,
            progress_processed INTEGER NOT NULL DEFAULT 0,
            progress_succeeded INTEGER NOT NULL DEFAULT 0,
            progress_failed INTEGER NOT NULL DEFAULT 0,
            logs TEXT NOT NULL DEFAULT '[]',
            initiator TEXT NOT NULL,
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            failure TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            actor TEXT NOT NULL,
            target TEXT NOT NULL,
            details TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_target ON audit_log(target)")
        .execute(pool)
        .await?;

    tracing::info!(
        "Database tables initialized (settings, content_records, validation_decisions, migration_jobs, audit_log)"
    );

    Ok(())
}

/// Parse an RFC 3339 column value
pub(crate) fn parse_timestamp(
    value: &str,
    column: &str,
) -> kgp_common::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| kgp_common::Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// Parse a column holding an enum's wire string
pub(crate) fn parse_column<T>(value: &str) -> kgp_common::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse::<T>().map_err(kgp_common::Error::Internal)
}
