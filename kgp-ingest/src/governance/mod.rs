//! Governance Workflow
//!
//! Owns persistence of admitted records and every status change after that.
//! Each change is a guarded compare-and-set in the content store; each change
//! except resubmission writes exactly one ValidationDecision with it, and
//! every change is reported to the audit sink and the event bus.

pub mod state;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use kgp_common::events::{EventBus, KgpEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::admission::{
    Admission, AdmissionGate, AdmitOptions, DuplicateError, GateFault, Rejection, ValidationError,
};
use crate::audit::{content_target, record_or_warn, AuditSink};
use crate::db::{ContentFilter, ContentStore, StatusChange};
use crate::models::{ContentRecord, ContentStatus, Priority, RawCandidate, ValidationDecision};
pub use state::{next_state, GovernanceAction, InvalidTransitionError};

/// Permission an actor may hold; role storage lives outside this service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Review,
    Archive,
    Triage,
    Migrate,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Review => "review",
            Capability::Archive => "archive",
            Capability::Triage => "triage",
            Capability::Migrate => "migrate",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "review" => Ok(Capability::Review),
            "archive" => Ok(Capability::Archive),
            "triage" => Ok(Capability::Triage),
            "migrate" => Ok(Capability::Migrate),
            other => Err(format!("unknown capability '{}'", other)),
        }
    }
}

/// Caller identity as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub capabilities: BTreeSet<Capability>,
}

impl Actor {
    pub fn new(id: impl Into<String>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("content {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Duplicate(#[from] DuplicateError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransitionError),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Gate(#[from] GateFault),

    #[error("content store unavailable: {0}")]
    Store(#[from] kgp_common::Error),
}

impl From<Rejection> for GovernanceError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Validation(e) => GovernanceError::Validation(e),
            Rejection::Duplicate(e) => GovernanceError::Duplicate(e),
        }
    }
}

/// Reviewer's decision on a pending record
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReviewRequest {
    pub status: ContentStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Clone)]
pub struct GovernanceWorkflow {
    store: ContentStore,
    gate: AdmissionGate,
    audit: Arc<dyn AuditSink>,
    event_bus: EventBus,
}

impl GovernanceWorkflow {
    pub fn new(
        store: ContentStore,
        gate: AdmissionGate,
        audit: Arc<dyn AuditSink>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            gate,
            audit,
            event_bus,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Interactive submission: admit, then store
    ///
    /// Rejections surface synchronously as `Validation` or `Duplicate`.
    pub async fn submit(
        &self,
        candidate: &RawCandidate,
        actor: &Actor,
        skip_duplicates: bool,
    ) -> Result<ContentRecord, GovernanceError> {
        let options = AdmitOptions::interactive(actor.id.clone(), skip_duplicates);
        match self.gate.admit(candidate, &options).await? {
            Admission::Rejected(rejection) => Err(rejection.into()),
            Admission::Accepted(record) | Admission::Flagged { record, .. } => {
                Ok(self.accept(record, &actor.id).await?)
            }
        }
    }

    /// Persist a record the gate accepted or flagged
    pub async fn accept(
        &self,
        record: ContentRecord,
        submitted_by: &str,
    ) -> kgp_common::Result<ContentRecord> {
        self.store.insert(&record).await?;

        info!(
            content_id = %record.id,
            origin = record.origin.as_str(),
            flagged = record.flagged,
            quality_score = record.quality_score,
            "Content admitted"
        );

        record_or_warn(
            self.audit.as_ref(),
            "admit",
            submitted_by,
            &content_target(record.id),
            json!({
                "origin": record.origin.as_str(),
                "flagged": record.flagged,
                "quality_score": record.quality_score,
                "duplicate_score": record.duplicate_score,
                "quality_issues": record.quality_issues,
            }),
        )
        .await;

        self.event_bus.emit_lossy(KgpEvent::ContentAdmitted {
            content_id: record.id,
            origin: record.origin.as_str().to_string(),
            flagged: record.flagged,
            timestamp: Utc::now(),
        });

        Ok(record)
    }

    /// Approve, reject, or request revision of a pending record
    pub async fn review(
        &self,
        content_id: Uuid,
        actor: &Actor,
        request: ReviewRequest,
    ) -> Result<ContentRecord, GovernanceError> {
        let action = GovernanceAction::for_review_outcome(request.status).ok_or_else(|| {
            ValidationError::single(
                "status",
                "must be one of approved, rejected, revision_requested",
            )
        })?;

        self.apply(content_id, actor, action, request.notes, request.priority)
            .await
    }

    /// Author moves a RevisionRequested record back to Pending
    pub async fn resubmit(
        &self,
        content_id: Uuid,
        actor: &Actor,
    ) -> Result<ContentRecord, GovernanceError> {
        self.apply(content_id, actor, GovernanceAction::Resubmit, None, Priority::default())
            .await
    }

    /// Approved → Archived
    pub async fn archive(
        &self,
        content_id: Uuid,
        actor: &Actor,
    ) -> Result<ContentRecord, GovernanceError> {
        self.apply(content_id, actor, GovernanceAction::Archive, None, Priority::default())
            .await
    }

    /// Clear the flag; the record rejoins the normal pending queue
    pub async fn mark_safe(
        &self,
        content_id: Uuid,
        actor: &Actor,
    ) -> Result<ContentRecord, GovernanceError> {
        self.apply(content_id, actor, GovernanceAction::MarkSafe, None, Priority::default())
            .await
    }

    /// Archive a flagged record without approval
    pub async fn archive_flagged(
        &self,
        content_id: Uuid,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<ContentRecord, GovernanceError> {
        self.apply(
            content_id,
            actor,
            GovernanceAction::TriageArchive,
            notes,
            Priority::default(),
        )
        .await
    }

    pub async fn get(&self, content_id: Uuid) -> Result<ContentRecord, GovernanceError> {
        self.store
            .get(content_id)
            .await?
            .ok_or(GovernanceError::NotFound(content_id))
    }

    /// Normal review queue: pending and not flagged
    pub async fn pending_queue(&self) -> Result<Vec<ContentRecord>, GovernanceError> {
        Ok(self
            .store
            .list(ContentFilter {
                status: Some(ContentStatus::Pending),
                flagged: Some(false),
            })
            .await?)
    }

    /// Quality-review lane: pending and flagged
    pub async fn flagged_queue(&self) -> Result<Vec<ContentRecord>, GovernanceError> {
        Ok(self
            .store
            .list(ContentFilter {
                status: Some(ContentStatus::Pending),
                flagged: Some(true),
            })
            .await?)
    }

    pub async fn decisions_for(
        &self,
        content_id: Uuid,
    ) -> Result<Vec<ValidationDecision>, GovernanceError> {
        self.get(content_id).await?;
        Ok(self.store.decisions_for(content_id).await?)
    }

    async fn apply(
        &self,
        content_id: Uuid,
        actor: &Actor,
        action: GovernanceAction,
        notes: Option<String>,
        priority: Priority,
    ) -> Result<ContentRecord, GovernanceError> {
        if let Some(capability) = action.required_capability() {
            if !actor.has(capability) {
                return Err(GovernanceError::Forbidden(format!(
                    "actor '{}' lacks the {} capability required to {}",
                    actor.id, capability, action
                )));
            }
        }

        let record = self.get(content_id).await?;

        if action == GovernanceAction::Resubmit && record.author != actor.id {
            return Err(GovernanceError::Forbidden(format!(
                "only the author may resubmit content {}",
                content_id
            )));
        }

        let (new_status, new_flagged) = next_state(record.status, record.flagged, action)
            .ok_or(InvalidTransitionError {
                content_id,
                from: record.status,
                flagged: record.flagged,
                action,
            })?;

        let notes = notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if action.requires_notes() && notes.is_none() {
            return Err(ValidationError::single(
                "notes",
                format!("required to {}", action),
            )
            .into());
        }

        let decision = action.records_decision().then(|| ValidationDecision {
            id: Uuid::new_v4(),
            content_id,
            reviewer: actor.id.clone(),
            action: action.as_str().to_string(),
            resulting_status: new_status,
            notes: notes.clone(),
            priority,
            created_at: Utc::now(),
        });

        let applied = self
            .store
            .apply_change(StatusChange {
                content_id,
                expected_status: record.status,
                expected_flagged: record.flagged,
                new_status,
                new_flagged,
                decision: decision.as_ref(),
            })
            .await?;

        if !applied {
            // Lost a race with another action; report against the current state
            let current = self.get(content_id).await?;
            return Err(InvalidTransitionError {
                content_id,
                from: current.status,
                flagged: current.flagged,
                action,
            }
            .into());
        }

        info!(
            content_id = %content_id,
            actor = %actor.id,
            action = %action,
            from = %record.status,
            to = %new_status,
            "Content transitioned"
        );

        record_or_warn(
            self.audit.as_ref(),
            action.as_str(),
            &actor.id,
            &content_target(content_id),
            json!({
                "from": record.status.as_str(),
                "to": new_status.as_str(),
                "flagged": new_flagged,
                "notes": notes,
                "decision_id": decision.as_ref().map(|d| d.id),
            }),
        )
        .await;

        self.event_bus.emit_lossy(KgpEvent::ContentTransitioned {
            content_id,
            old_status: record.status.as_str().to_string(),
            new_status: new_status.as_str().to_string(),
            action: action.as_str().to_string(),
            actor: actor.id.clone(),
            timestamp: Utc::now(),
        });

        Ok(ContentRecord {
            status: new_status,
            flagged: new_flagged,
            ..record
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_parsing() {
        assert_eq!(" Review ".parse::<Capability>(), Ok(Capability::Review));
        assert_eq!("triage".parse::<Capability>(), Ok(Capability::Triage));
        assert!("admin".parse::<Capability>().is_err());
    }

    #[test]
    fn test_actor_capabilities() {
        let actor = Actor::new("rita", [Capability::Review, Capability::Archive]);
        assert!(actor.has(Capability::Review));
        assert!(!actor.has(Capability::Triage));
    }

    #[test]
    fn test_review_request_defaults() {
        let request: ReviewRequest = serde_json::from_str(r#"{"status": "approved"}"#).unwrap();
        assert_eq!(request.status, ContentStatus::Approved);
        assert_eq!(request.notes, None);
        assert_eq!(request.priority, Priority::Medium);
    }
}
