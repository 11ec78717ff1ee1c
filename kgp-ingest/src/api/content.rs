//! Content submission, review queues, and governance actions

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::actor::CallingActor;
use crate::error::ApiResult;
use crate::governance::ReviewRequest;
use crate::models::{ContentRecord, RawCandidate, ValidationDecision};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitQuery {
    #[serde(default = "default_skip_duplicates")]
    pub skip_duplicates: bool,
}

fn default_skip_duplicates() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct NotesRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /content
///
/// 201 with the stored record; 422 on invalid fields, 409 on a duplicate.
pub async fn submit_content(
    State(state): State<AppState>,
    CallingActor(actor): CallingActor,
    Query(query): Query<SubmitQuery>,
    Json(candidate): Json<RawCandidate>,
) -> ApiResult<(StatusCode, Json<ContentRecord>)> {
    let record = state
        .workflow
        .submit(&candidate, &actor, query.skip_duplicates)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /content/:id
pub async fn get_content(
    State(state): State<AppState>,
    Path(content_id): Path<Uuid>,
) -> ApiResult<Json<ContentRecord>> {
    Ok(Json(state.workflow.get(content_id).await?))
}

/// GET /content/pending
pub async fn pending_queue(State(state): State<AppState>) -> ApiResult<Json<Vec<ContentRecord>>> {
    Ok(Json(state.workflow.pending_queue().await?))
}

/// GET /content/flagged
pub async fn flagged_queue(State(state): State<AppState>) -> ApiResult<Json<Vec<ContentRecord>>> {
    Ok(Json(state.workflow.flagged_queue().await?))
}

/// POST /content/:id/review
pub async fn review_content(
    State(state): State<AppState>,
    CallingActor(actor): CallingActor,
    Path(content_id): Path<Uuid>,
    Json(request): Json<ReviewRequest>,
) -> ApiResult<Json<ContentRecord>> {
    Ok(Json(state.workflow.review(content_id, &actor, request).await?))
}

/// POST /content/:id/resubmit
pub async fn resubmit_content(
    State(state): State<AppState>,
    CallingActor(actor): CallingActor,
    Path(content_id): Path<Uuid>,
) -> ApiResult<Json<ContentRecord>> {
    Ok(Json(state.workflow.resubmit(content_id, &actor).await?))
}

/// POST /content/:id/archive
pub async fn archive_content(
    State(state): State<AppState>,
    CallingActor(actor): CallingActor,
    Path(content_id): Path<Uuid>,
) -> ApiResult<Json<ContentRecord>> {
    Ok(Json(state.workflow.archive(content_id, &actor).await?))
}

/// POST /content/:id/mark-safe
pub async fn mark_safe(
    State(state): State<AppState>,
    CallingActor(actor): CallingActor,
    Path(content_id): Path<Uuid>,
) -> ApiResult<Json<ContentRecord>> {
    Ok(Json(state.workflow.mark_safe(content_id, &actor).await?))
}

/// POST /content/:id/triage-archive
///
/// Body is optional: `{"notes": "..."}`.
pub async fn triage_archive(
    State(state): State<AppState>,
    CallingActor(actor): CallingActor,
    Path(content_id): Path<Uuid>,
    body: Option<Json<NotesRequest>>,
) -> ApiResult<Json<ContentRecord>> {
    let notes = body.and_then(|Json(request)| request.notes);
    Ok(Json(
        state
            .workflow
            .archive_flagged(content_id, &actor, notes)
            .await?,
    ))
}

/// GET /content/:id/decisions
pub async fn list_decisions(
    State(state): State<AppState>,
    Path(content_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ValidationDecision>>> {
    Ok(Json(state.workflow.decisions_for(content_id).await?))
}

/// Build content routes
pub fn content_routes() -> Router<AppState> {
    Router::new()
        .route("/content", post(submit_content))
        .route("/content/pending", get(pending_queue))
        .route("/content/flagged", get(flagged_queue))
        .route("/content/:id", get(get_content))
        .route("/content/:id/review", post(review_content))
        .route("/content/:id/resubmit", post(resubmit_content))
        .route("/content/:id/archive", post(archive_content))
        .route("/content/:id/mark-safe", post(mark_safe))
        .route("/content/:id/triage-archive", post(triage_archive))
        .route("/content/:id/decisions", get(list_decisions))
}
