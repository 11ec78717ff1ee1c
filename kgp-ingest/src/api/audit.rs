//! Audit trail read API

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::audit::AuditEntry;
use crate::error::ApiResult;
use crate::AppState;

/// GET /audit/:target
///
/// `target` is `content:<uuid>` or `job:<uuid>`; entries are oldest first.
pub async fn list_audit_entries(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    Ok(Json(state.audit.entries_for(&target).await?))
}

/// Build audit routes
pub fn audit_routes() -> Router<AppState> {
    Router::new().route("/audit/:target", get(list_audit_entries))
}
