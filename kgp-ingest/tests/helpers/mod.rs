//! Shared fixtures for kgp-ingest integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kgp_common::events::EventBus;
use kgp_ingest::governance::{Actor, Capability};
use kgp_ingest::migration::{ConnectorRegistry, MemoryConnector, MEMORY_SYSTEM};
use kgp_ingest::models::{
    AdmissionParameters, EngineParameters, MigrationConfig, MigrationJob, RawCandidate,
    SourceDescriptor,
};
use kgp_ingest::migration::CreateJobRequest;
use kgp_ingest::AppState;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// In-memory database with the full schema
///
/// One connection that never idles out, so every query sees the same
/// in-memory database.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    kgp_ingest::db::init_tables(&pool)
        .await
        .expect("Failed to initialize schema");

    pool
}

pub struct TestHarness {
    pub pool: SqlitePool,
    pub state: AppState,
    pub memory: MemoryConnector,
}

pub async fn harness() -> TestHarness {
    harness_with(AdmissionParameters::default(), EngineParameters::default()).await
}

pub async fn harness_with(admission: AdmissionParameters, engine: EngineParameters) -> TestHarness {
    let pool = test_pool().await;
    let memory = MemoryConnector::new();

    let mut connectors = ConnectorRegistry::with_builtin();
    connectors.register(Arc::new(memory.clone()));

    let state = AppState::new(pool.clone(), EventBus::new(1000), admission, engine, connectors);

    TestHarness {
        pool,
        state,
        memory,
    }
}

pub fn actor(id: &str, capabilities: &[Capability]) -> Actor {
    Actor::new(id, capabilities.iter().copied())
}

/// Actor holding every capability
pub fn admin(id: &str) -> Actor {
    actor(
        id,
        &[
            Capability::Review,
            Capability::Archive,
            Capability::Triage,
            Capability::Migrate,
        ],
    )
}

pub fn candidate(title: &str, description: &str, category: &str) -> RawCandidate {
    RawCandidate {
        title: title.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        ..RawCandidate::default()
    }
}

/// Well-formed candidate that passes the quality floor unflagged
pub fn good_candidate() -> RawCandidate {
    candidate(
        "Release approval workflow",
        "Every release needs sign-off from the owning team and the on-call engineer before deploy.",
        "process",
    )
}

/// Candidate that scores below the default quality floor
pub fn spam_candidate() -> RawCandidate {
    candidate("test test", "test test test test test test", "technical")
}

fn splitmix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Pseudo-random lowercase word, stable for a given seed
fn synthetic_word(seed: u64) -> String {
    let mut state = splitmix(seed);
    let len = 5 + (state % 4) as usize;
    (0..len)
        .map(|_| {
            state = splitmix(state);
            (b'a' + (state % 26) as u8) as char
        })
        .collect()
}

/// Candidate `n` of a dataset whose members are mutually dissimilar
pub fn distinct_candidate(n: u64) -> RawCandidate {
    let word = |k: u64| synthetic_word(n * 1000 + k);
    let title_words: Vec<String> = (0..3).map(word).collect();
    let body_words: Vec<String> = (10..22).map(word).collect();

    let mut title = title_words.join(" ");
    title[..1].make_ascii_uppercase();

    RawCandidate {
        external_id: Some(format!("LEGACY-{}", n)),
        title,
        description: format!("The {} process: {}.", word(5), body_words.join(" ")),
        category: "process".to_string(),
        ..RawCandidate::default()
    }
}

pub fn distinct_dataset(count: u64) -> Vec<RawCandidate> {
    (1..=count).map(distinct_candidate).collect()
}

pub fn memory_job(name: &str, dataset: &str, config: MigrationConfig) -> CreateJobRequest {
    CreateJobRequest {
        name: name.to_string(),
        description: String::new(),
        source: SourceDescriptor::new(MEMORY_SYSTEM).with_parameter("dataset", dataset),
        migration_config: config,
    }
}

pub fn batch_config(batch_size: usize) -> MigrationConfig {
    MigrationConfig {
        batch_size,
        ..MigrationConfig::default()
    }
}

/// Poll until the job leaves Pending/InProgress and its loop has exited
pub async fn wait_for_terminal(state: &AppState, job_id: uuid::Uuid) -> MigrationJob {
    for _ in 0..500 {
        let job = state.engine.get_status(job_id).await.expect("job exists");
        if job.is_terminal() && !state.engine.is_running(job_id).await {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not reach a terminal status", job_id);
}
