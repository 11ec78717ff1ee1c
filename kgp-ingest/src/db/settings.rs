//! Settings table access
//!
//! Key/value rows that override TOML admission and migration parameters at
//! startup. Resolution: settings table → TOML → compiled defaults.

use sqlx::{Pool, Sqlite};
use kgp_common::{Error, Result};

use crate::models::{AdmissionParameters, EngineParameters};

pub const DUPLICATE_THRESHOLD_KEY: &str = "admission_duplicate_threshold";
pub const QUALITY_FLOOR_KEY: &str = "admission_quality_floor";
pub const MAX_DUPLICATE_MATCHES_KEY: &str = "admission_max_duplicate_matches";
pub const MIN_DESCRIPTION_CHARS_KEY: &str = "admission_min_description_chars";
pub const MAX_AUTO_TAGS_KEY: &str = "admission_max_auto_tags";
pub const MAX_BATCH_SIZE_KEY: &str = "migration_max_batch_size";

/// Apply any stored overrides on top of `base`
pub async fn load_admission_parameters(
    db: &Pool<Sqlite>,
    base: AdmissionParameters,
) -> Result<AdmissionParameters> {
    let mut params = base;

    if let Some(v) = get_setting(db, DUPLICATE_THRESHOLD_KEY).await? {
        params.duplicate_threshold = v;
    }
    if let Some(v) = get_setting(db, QUALITY_FLOOR_KEY).await? {
        params.quality_floor = v;
    }
    if let Some(v) = get_setting(db, MAX_DUPLICATE_MATCHES_KEY).await? {
        params.max_duplicate_matches = v;
    }
    if let Some(v) = get_setting(db, MIN_DESCRIPTION_CHARS_KEY).await? {
        params.min_description_chars = v;
    }
    if let Some(v) = get_setting(db, MAX_AUTO_TAGS_KEY).await? {
        params.max_auto_tags = v;
    }

    params.validate().map_err(Error::Config)?;
    Ok(params)
}

pub async fn load_engine_parameters(
    db: &Pool<Sqlite>,
    base: EngineParameters,
) -> Result<EngineParameters> {
    let mut params = base;
    if let Some(v) = get_setting(db, MAX_BATCH_SIZE_KEY).await? {
        params.max_batch_size = v;
    }
    Ok(params)
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
