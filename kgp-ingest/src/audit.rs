//! Audit sink contract
//!
//! Governance transitions and job lifecycle changes are reported here. The
//! sink is write-only from the core's point of view; a failed write is logged
//! and never undoes the state change it describes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub actor: String,
    /// Target reference, e.g. "content:<uuid>" or "job:<uuid>"
    pub target: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(
        &self,
        action: &str,
        actor: &str,
        target: &str,
        details: serde_json::Value,
    ) -> kgp_common::Result<()>;
}

pub fn content_target(id: uuid::Uuid) -> String {
    format!("content:{}", id)
}

pub fn job_target(id: uuid::Uuid) -> String {
    format!("job:{}", id)
}

/// Record an entry, downgrading sink failures to a warning
pub async fn record_or_warn(
    sink: &dyn AuditSink,
    action: &str,
    actor: &str,
    target: &str,
    details: serde_json::Value,
) {
    if let Err(e) = sink.record(action, actor, target, details).await {
        tracing::warn!(action, actor, target, error = %e, "Failed to write audit entry");
    }
}
