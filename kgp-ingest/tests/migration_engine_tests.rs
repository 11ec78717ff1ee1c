//! Migration engine tests: batching, per-record isolation, cancellation,
//! systemic faults, recovery, and shutdown

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use helpers::*;
use kgp_common::events::KgpEvent;
use kgp_ingest::db::SqliteJobRegistry;
use kgp_ingest::governance::Capability;
use kgp_ingest::migration::{
    ConnectorFault, CreateJobRequest, EngineError, JobRegistry, SourceConnector, SourceHandle,
    JSON_FILE_SYSTEM,
};
use kgp_ingest::models::{
    ContentStatus, JobStatus, LogLevel, MigrationConfig, MigrationJob, Origin, RawCandidate,
    SourceDescriptor,
};
use tokio::sync::{Notify, Semaphore};

const GATED_SYSTEM: &str = "gated";

/// Source whose second and later batches wait for a permit
///
/// `entered` fires each time a gated batch starts waiting, so a test can act
/// while the loop is known to be inside `next_batch`.
#[derive(Clone)]
struct GatedConnector {
    records: Vec<RawCandidate>,
    permits: Arc<Semaphore>,
    entered: Arc<Notify>,
}

impl GatedConnector {
    fn new(records: Vec<RawCandidate>) -> Self {
        Self {
            records,
            permits: Arc::new(Semaphore::new(0)),
            entered: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl SourceConnector for GatedConnector {
    fn system(&self) -> &str {
        GATED_SYSTEM
    }

    async fn open(&self, _source: &SourceDescriptor) -> Result<Box<dyn SourceHandle>, ConnectorFault> {
        Ok(Box::new(GatedHandle {
            records: self.records.clone().into_iter(),
            batches: 0,
            permits: self.permits.clone(),
            entered: self.entered.clone(),
        }))
    }
}

struct GatedHandle {
    records: std::vec::IntoIter<RawCandidate>,
    batches: usize,
    permits: Arc<Semaphore>,
    entered: Arc<Notify>,
}

#[async_trait]
impl SourceHandle for GatedHandle {
    async fn estimate_total(&mut self) -> Result<Option<u64>, ConnectorFault> {
        Ok(Some(self.records.len() as u64))
    }

    async fn next_batch(
        &mut self,
        batch_size: usize,
    ) -> Result<Option<Vec<RawCandidate>>, ConnectorFault> {
        self.batches += 1;
        if self.batches > 1 {
            self.entered.notify_one();
            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| ConnectorFault::Read(e.to_string()))?;
            permit.forget();
        }
        let batch: Vec<RawCandidate> = self.records.by_ref().take(batch_size).collect();
        Ok((!batch.is_empty()).then_some(batch))
    }

    async fn close(&mut self) -> Result<(), ConnectorFault> {
        Ok(())
    }
}

fn gated_job(name: &str, batch_size: usize) -> CreateJobRequest {
    CreateJobRequest {
        name: name.to_string(),
        description: String::new(),
        source: SourceDescriptor::new(GATED_SYSTEM),
        migration_config: batch_config(batch_size),
    }
}

async fn gated_harness(records: Vec<RawCandidate>) -> (TestHarness, GatedConnector) {
    let h = harness().await;
    let gated = GatedConnector::new(records);
    let mut connectors = kgp_ingest::migration::ConnectorRegistry::with_builtin();
    connectors.register(Arc::new(h.memory.clone()));
    connectors.register(Arc::new(gated.clone()));

    let state = kgp_ingest::AppState::new(
        h.pool.clone(),
        h.state.event_bus.clone(),
        Default::default(),
        Default::default(),
        connectors,
    );
    (
        TestHarness {
            pool: h.pool,
            state,
            memory: h.memory,
        },
        gated,
    )
}

async fn run_to_end(h: &TestHarness, request: CreateJobRequest) -> MigrationJob {
    let migrator = admin("ops");
    let job = h.state.engine.create_job(request, &migrator).await.unwrap();
    h.state.engine.start(job.id, &migrator).await.unwrap();
    wait_for_terminal(&h.state, job.id).await
}

fn messages(job: &MigrationJob, level: LogLevel) -> Vec<&str> {
    job.logs
        .iter()
        .filter(|l| l.level == level)
        .map(|l| l.message.as_str())
        .collect()
}

#[tokio::test]
async fn test_job_imports_all_records_in_batches() {
    let h = harness().await;
    h.memory.put_dataset("wiki", distinct_dataset(7)).await;
    let mut events = h.state.event_bus.subscribe();

    let job = run_to_end(&h, memory_job("wiki import", "wiki", batch_config(3))).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.total, Some(7));
    assert_eq!(job.progress.processed, 7);
    assert_eq!(job.progress.succeeded, 7);
    assert_eq!(job.progress.failed, 0);
    assert!(job.started_at.is_some() && job.completed_at.is_some());
    assert!(job.failure.is_none());

    let pending = h.state.workflow.pending_queue().await.unwrap();
    assert_eq!(pending.len(), 7);
    assert!(pending.iter().all(|r| r.origin == Origin::Migrated && r.author == "ops"));
    assert!(pending
        .iter()
        .any(|r| r.external_ref.as_deref() == Some("LEGACY-3")));

    // One progress event per batch (3 + 3 + 1), plus the total report
    let mut progress_events = 0;
    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            KgpEvent::JobProgress { job_id, .. } if job_id == job.id => progress_events += 1,
            KgpEvent::JobCompleted { job_id, succeeded, .. } if job_id == job.id => {
                assert_eq!(succeeded, 7);
                completed = true;
            }
            _ => {}
        }
    }
    assert_eq!(progress_events, 4);
    assert!(completed);

    let audit = h
        .state
        .audit
        .entries_for(&format!("job:{}", job.id))
        .await
        .unwrap();
    let actions: Vec<&str> = audit.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["job_create", "job_start", "job_completed"]);
}

#[tokio::test]
async fn test_bad_records_never_abort_the_batch() {
    let h = harness().await;
    let mut invalid = distinct_candidate(2);
    invalid.title = String::new();
    invalid.category = "gossip".to_string();

    let dataset = vec![
        distinct_candidate(1),
        invalid,
        distinct_candidate(3),
        // Same text as record 1: the run sees its own earlier admissions
        RawCandidate {
            external_id: Some("LEGACY-1-COPY".to_string()),
            ..distinct_candidate(1)
        },
        distinct_candidate(5),
    ];
    h.memory.put_dataset("mixed", dataset).await;

    let job = run_to_end(&h, memory_job("mixed", "mixed", batch_config(10))).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.processed, 5);
    assert_eq!(job.progress.succeeded, 3);
    assert_eq!(job.progress.failed, 2);

    let errors = messages(&job, LogLevel::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("rejected LEGACY-2"));
    assert!(errors[0].contains("title"));
    assert!(errors[0].contains("category"));

    let warnings = messages(&job, LogLevel::Warn);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].starts_with("skipped LEGACY-1-COPY"));

    assert_eq!(h.state.workflow.pending_queue().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_duplicate_second_record_counts_as_one_failure() {
    let h = harness().await;
    let dataset = vec![
        distinct_candidate(1),
        RawCandidate {
            external_id: Some("LEGACY-2".to_string()),
            ..distinct_candidate(1)
        },
        distinct_candidate(3),
    ];
    h.memory.put_dataset("three", dataset).await;

    let job = run_to_end(&h, memory_job("three", "three", batch_config(2))).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.total, Some(3));
    assert_eq!(job.progress.processed, 3);
    assert_eq!(job.progress.succeeded, 2);
    assert_eq!(job.progress.failed, 1);

    let about_second: Vec<&str> = job
        .logs
        .iter()
        .map(|l| l.message.as_str())
        .filter(|m| m.contains("LEGACY-2"))
        .collect();
    assert_eq!(about_second.len(), 1);
    assert!(about_second[0].starts_with("skipped LEGACY-2"));
}

#[tokio::test]
async fn test_progress_events_keep_counters_consistent() {
    let h = harness().await;
    let mut invalid = distinct_candidate(4);
    invalid.description = String::new();
    let dataset = vec![
        distinct_candidate(1),
        distinct_candidate(2),
        distinct_candidate(1),
        invalid,
        distinct_candidate(5),
        distinct_candidate(6),
        distinct_candidate(7),
    ];
    h.memory.put_dataset("mixed", dataset).await;
    let mut events = h.state.event_bus.subscribe();

    let job = run_to_end(&h, memory_job("mixed", "mixed", batch_config(2))).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let KgpEvent::JobProgress {
            job_id,
            processed,
            succeeded,
            failed,
            ..
        } = event
        {
            if job_id == job.id {
                seen.push((processed, succeeded, failed));
            }
        }
    }

    // Total report plus four batches
    assert_eq!(seen.len(), 5);
    for (processed, succeeded, failed) in &seen {
        assert_eq!(*processed, succeeded + failed);
    }
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    assert_eq!(seen.last(), Some(&(7, 5, 2)));
    assert_eq!(job.progress.processed, 7);
}

#[tokio::test]
async fn test_duplicates_imported_flagged_when_skipping_disabled() {
    let h = harness().await;
    h.memory
        .put_dataset("dups", vec![distinct_candidate(1), distinct_candidate(1)])
        .await;

    let config = MigrationConfig {
        skip_duplicates: false,
        ..batch_config(5)
    };
    let job = run_to_end(&h, memory_job("dups", "dups", config)).await;

    assert_eq!(job.progress.succeeded, 2);
    assert_eq!(job.progress.failed, 0);
    assert_eq!(h.state.workflow.pending_queue().await.unwrap().len(), 1);
    assert_eq!(h.state.workflow.flagged_queue().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_quality_floor_only_when_validating() {
    let h = harness().await;
    h.memory.put_dataset("spam", vec![spam_candidate()]).await;

    let validated = run_to_end(&h, memory_job("checked", "spam", batch_config(5))).await;
    assert_eq!(validated.progress.succeeded, 1);
    assert_eq!(h.state.workflow.flagged_queue().await.unwrap().len(), 1);

    let h = harness().await;
    h.memory.put_dataset("spam", vec![spam_candidate()]).await;
    let config = MigrationConfig {
        validate_before_import: false,
        ..batch_config(5)
    };
    let unchecked = run_to_end(&h, memory_job("unchecked", "spam", config)).await;
    assert_eq!(unchecked.progress.succeeded, 1);
    assert!(h.state.workflow.flagged_queue().await.unwrap().is_empty());
    assert_eq!(h.state.workflow.pending_queue().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_source_fails_job() {
    let h = harness().await;
    let request = CreateJobRequest {
        name: "sharepoint".to_string(),
        description: String::new(),
        source: SourceDescriptor::new("sharepoint"),
        migration_config: MigrationConfig::default(),
    };

    let job = run_to_end(&h, request).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .failure
        .as_deref()
        .unwrap_or_default()
        .contains("unknown source system 'sharepoint'"));
    assert_eq!(job.progress.processed, 0);
}

#[tokio::test]
async fn test_out_of_range_batch_size_fails_job() {
    let h = harness().await;
    h.memory.put_dataset("wiki", distinct_dataset(2)).await;

    let job = run_to_end(&h, memory_job("zero", "wiki", batch_config(0))).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.failure.as_deref().unwrap_or_default().contains("batch_size"));
    assert!(h.state.workflow.pending_queue().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_source_fault_keeps_partial_progress() {
    let h = harness().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.ndjson");
    let mut lines: Vec<String> = (1..=2)
        .map(|n| serde_json::to_string(&distinct_candidate(n)).unwrap())
        .collect();
    lines.push("{ not json".to_string());
    std::fs::write(&path, lines.join("\n")).unwrap();

    let request = CreateJobRequest {
        name: "ndjson".to_string(),
        description: String::new(),
        source: SourceDescriptor::new(JSON_FILE_SYSTEM)
            .with_parameter("path", path.to_string_lossy()),
        migration_config: batch_config(2),
    };
    let job = run_to_end(&h, request).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress.total, None);
    assert_eq!(job.progress.processed, 2);
    assert_eq!(job.progress.succeeded, 2);
    assert!(job.failure.as_deref().unwrap_or_default().contains("line 3"));
    assert_eq!(h.state.workflow.pending_queue().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_json_array_file_import() {
    let h = harness().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.json");
    std::fs::write(&path, serde_json::to_string(&distinct_dataset(4)).unwrap()).unwrap();

    let request = CreateJobRequest {
        name: "json".to_string(),
        description: String::new(),
        source: SourceDescriptor::new(JSON_FILE_SYSTEM)
            .with_parameter("path", path.to_string_lossy()),
        migration_config: batch_config(3),
    };
    let job = run_to_end(&h, request).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.total, Some(4));
    assert_eq!(job.progress.succeeded, 4);
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let h = harness().await;
    let migrator = admin("ops");
    let job = h
        .state
        .engine
        .create_job(memory_job("never", "none", MigrationConfig::default()), &migrator)
        .await
        .unwrap();

    let cancelled = h.state.engine.cancel(job.id, &migrator).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    let err = h.state.engine.start(job.id, &migrator).await.unwrap_err();
    match err {
        EngineError::InvalidState(e) => {
            assert_eq!(e.status, JobStatus::Cancelled);
            assert_eq!(e.operation, "start");
        }
        other => panic!("expected invalid state, got {:?}", other),
    }

    let err = h.state.engine.cancel(job.id, &migrator).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn test_cancel_running_job_drains_in_flight_batch() {
    let (h, gated) = gated_harness(distinct_dataset(10)).await;
    let migrator = admin("ops");

    let job = h
        .state
        .engine
        .create_job(gated_job("slow", 2), &migrator)
        .await
        .unwrap();
    h.state.engine.start(job.id, &migrator).await.unwrap();

    // Loop is now waiting inside the second next_batch
    tokio::time::timeout(Duration::from_secs(5), gated.entered.notified())
        .await
        .expect("second batch requested");

    let requested = h.state.engine.cancel(job.id, &migrator).await.unwrap();
    assert_eq!(requested.status, JobStatus::InProgress);
    assert!(requested.cancel_requested);

    // Cancelling twice is harmless while the request is pending
    h.state.engine.cancel(job.id, &migrator).await.unwrap();

    gated.permits.add_permits(1);
    let job = wait_for_terminal(&h.state, job.id).await;

    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.progress.processed, 4);
    assert_eq!(job.progress.succeeded, 4);
    assert_eq!(h.state.workflow.pending_queue().await.unwrap().len(), 4);
    assert!(job
        .logs
        .iter()
        .any(|l| l.message.contains("cancelled at batch boundary")));
}

#[tokio::test]
async fn test_second_start_while_running_is_rejected() {
    let (h, gated) = gated_harness(distinct_dataset(6)).await;
    let migrator = admin("ops");
    let mut events = h.state.event_bus.subscribe();

    let job = h
        .state
        .engine
        .create_job(gated_job("once", 2), &migrator)
        .await
        .unwrap();
    h.state.engine.start(job.id, &migrator).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), gated.entered.notified())
        .await
        .expect("second batch requested");

    let err = h.state.engine.start(job.id, &migrator).await.unwrap_err();
    match err {
        EngineError::InvalidState(e) => {
            assert_eq!(e.status, JobStatus::InProgress);
            assert_eq!(e.operation, "start");
        }
        other => panic!("expected invalid state, got {:?}", other),
    }

    // Two more batches plus the exhausted call
    gated.permits.add_permits(3);
    let job = wait_for_terminal(&h.state, job.id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.total, Some(6));
    assert_eq!(job.progress.processed, 6);
    assert_eq!(job.progress.succeeded, 6);

    let mut starts = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, KgpEvent::JobStarted { job_id, .. } if job_id == job.id) {
            starts += 1;
        }
    }
    assert_eq!(starts, 1);
}

#[tokio::test]
async fn test_shutdown_stops_loops_at_batch_boundary() {
    let (h, gated) = gated_harness(distinct_dataset(6)).await;
    let migrator = admin("ops");

    let job = h
        .state
        .engine
        .create_job(gated_job("slow", 2), &migrator)
        .await
        .unwrap();
    h.state.engine.start(job.id, &migrator).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), gated.entered.notified())
        .await
        .expect("second batch requested");

    // shutdown() cancels on its first poll, before the batch is released
    tokio::join!(h.state.engine.shutdown(), async {
        gated.permits.add_permits(1);
    });

    let job = h.state.engine.get_status(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.progress.processed, 4);
    assert!(!h.state.engine.is_running(job.id).await);
}

#[tokio::test]
async fn test_recover_interrupted_jobs() {
    let h = harness().await;
    let registry = SqliteJobRegistry::new(h.pool.clone());

    let mut stale = MigrationJob::new(
        "left running".to_string(),
        String::new(),
        SourceDescriptor::new("memory"),
        MigrationConfig::default(),
        "ops".to_string(),
    );
    stale.transition_to(JobStatus::InProgress);
    stale.progress.record_success();
    let stale = registry.create(stale).await.unwrap();

    let recovered = h.state.engine.recover_interrupted_jobs().await.unwrap();
    assert_eq!(recovered, 1);

    let job = h.state.engine.get_status(stale.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.progress.processed, 1);
    assert!(job
        .logs
        .iter()
        .any(|l| l.message == "interrupted by service restart"));

    assert_eq!(h.state.engine.recover_interrupted_jobs().await.unwrap(), 0);
}

#[tokio::test]
async fn test_job_operations_require_migrate_capability() {
    let h = harness().await;
    let reviewer = actor("rita", &[Capability::Review]);

    let err = h
        .state
        .engine
        .create_job(memory_job("nope", "wiki", MigrationConfig::default()), &reviewer)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let job = h
        .state
        .engine
        .create_job(memory_job("ok", "wiki", MigrationConfig::default()), &admin("ops"))
        .await
        .unwrap();
    let err = h.state.engine.start(job.id, &reviewer).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
    assert_eq!(
        h.state.engine.get_status(job.id).await.unwrap().status,
        JobStatus::Pending
    );
}

#[tokio::test]
async fn test_create_job_validates_definition() {
    let h = harness().await;
    let request = CreateJobRequest {
        name: "  ".to_string(),
        description: String::new(),
        source: SourceDescriptor::new(""),
        migration_config: MigrationConfig::default(),
    };

    let err = h
        .state
        .engine
        .create_job(request, &admin("ops"))
        .await
        .unwrap_err();
    match err {
        EngineError::Validation(e) => assert_eq!(e.fields(), vec!["name", "source.system"]),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_list_jobs_filters_by_status() {
    let h = harness().await;
    let migrator = admin("ops");
    h.memory.put_dataset("wiki", distinct_dataset(1)).await;

    let first = h
        .state
        .engine
        .create_job(memory_job("first", "wiki", MigrationConfig::default()), &migrator)
        .await
        .unwrap();
    let second = h
        .state
        .engine
        .create_job(memory_job("second", "wiki", MigrationConfig::default()), &migrator)
        .await
        .unwrap();
    h.state.engine.cancel(first.id, &migrator).await.unwrap();

    let all = h.state.engine.list_jobs(None).await.unwrap();
    assert_eq!(all.len(), 2);

    let pending = h.state.engine.list_jobs(Some(JobStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second.id);

    let cancelled = h
        .state
        .engine
        .list_jobs(Some(JobStatus::Cancelled))
        .await
        .unwrap();
    assert_eq!(cancelled[0].id, first.id);
}

#[tokio::test]
async fn test_unknown_job_not_found() {
    let h = harness().await;
    let err = h
        .state
        .engine
        .get_status(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn test_migrated_records_enter_normal_governance() {
    let h = harness().await;
    h.memory.put_dataset("wiki", distinct_dataset(1)).await;
    run_to_end(&h, memory_job("wiki", "wiki", MigrationConfig::default())).await;

    let record = h.state.workflow.pending_queue().await.unwrap().remove(0);
    let approved = h
        .state
        .workflow
        .review(
            record.id,
            &actor("rita", &[Capability::Review]),
            kgp_ingest::governance::ReviewRequest {
                status: ContentStatus::Approved,
                notes: None,
                priority: Default::default(),
            },
        )
        .await
        .unwrap();
    assert_eq!(approved.status, ContentStatus::Approved);
}
