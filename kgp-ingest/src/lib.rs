//! kgp-ingest library interface
//!
//! Admission gate, governance workflow, and migration engine for the
//! knowledge governance pipeline, exposed for the binary and for integration
//! tests.

pub mod admission;
pub mod api;
pub mod audit;
pub mod db;
pub mod error;
pub mod governance;
pub mod migration;
pub mod models;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use kgp_common::events::EventBus;
use sqlx::SqlitePool;

use crate::admission::AdmissionGate;
use crate::db::{ContentStore, SqliteAuditSink, SqliteJobRegistry};
use crate::governance::GovernanceWorkflow;
use crate::migration::{ConnectorRegistry, MigrationEngine};
use crate::models::{AdmissionParameters, EngineParameters};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Interactive submission and all content status changes
    pub workflow: GovernanceWorkflow,
    /// Migration jobs and their background loops
    pub engine: MigrationEngine,
    /// Durable audit trail (also readable via `/audit/:target`)
    pub audit: SqliteAuditSink,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the components over one pool and event bus
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        admission: AdmissionParameters,
        engine_params: EngineParameters,
        connectors: ConnectorRegistry,
    ) -> Self {
        let store = ContentStore::new(db.clone());
        let audit = SqliteAuditSink::new(db.clone());
        let gate = AdmissionGate::new(Arc::new(store.clone()), admission);
        let workflow = GovernanceWorkflow::new(
            store,
            gate,
            Arc::new(audit.clone()),
            event_bus.clone(),
        );
        let engine = MigrationEngine::new(
            Arc::new(SqliteJobRegistry::new(db.clone())),
            connectors,
            workflow.clone(),
            Arc::new(audit.clone()),
            event_bus.clone(),
            engine_params,
        );

        Self {
            db,
            event_bus,
            workflow,
            engine,
            audit,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::content_routes())
        .merge(api::migration_routes())
        .merge(api::audit_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}
