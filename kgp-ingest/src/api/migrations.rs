//! Migration job administration
//!
//! Starting and cancelling are asynchronous: both return 202 with the job as
//! it stood when the request was accepted. Progress is polled via
//! `GET /migrations/:id` or followed on `/events`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::actor::CallingActor;
use crate::error::{ApiError, ApiResult};
use crate::migration::CreateJobRequest;
use crate::models::{JobStatus, MigrationJob};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
}

/// POST /migrations
pub async fn create_job(
    State(state): State<AppState>,
    CallingActor(actor): CallingActor,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<MigrationJob>)> {
    let job = state.engine.create_job(request, &actor).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /migrations?status=
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<MigrationJob>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    Ok(Json(state.engine.list_jobs(status).await?))
}

/// GET /migrations/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<MigrationJob>> {
    Ok(Json(state.engine.get_status(job_id).await?))
}

/// POST /migrations/:id/start
pub async fn start_job(
    State(state): State<AppState>,
    CallingActor(actor): CallingActor,
    Path(job_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<MigrationJob>)> {
    let job = state.engine.start(job_id, &actor).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// POST /migrations/:id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    CallingActor(actor): CallingActor,
    Path(job_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<MigrationJob>)> {
    let job = state.engine.cancel(job_id, &actor).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// Build migration routes
pub fn migration_routes() -> Router<AppState> {
    Router::new()
        .route("/migrations", post(create_job).get(list_jobs))
        .route("/migrations/:id", get(get_job))
        .route("/migrations/:id/start", post(start_job))
        .route("/migrations/:id/cancel", post(cancel_job))
}
