//! Content state graph
//!
//! ```text
//! Pending ──approve──────────▶ Approved ──archive──▶ Archived
//!    │  ──reject────────────▶ Rejected
//!    │  ──request_revision──▶ RevisionRequested ──resubmit──▶ Pending
//!    │
//!    └─(flagged) mark_safe ─▶ Pending (unflagged)
//!    └─(flagged) triage_archive ─▶ Archived
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ContentStatus;

use super::Capability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceAction {
    Approve,
    Reject,
    RequestRevision,
    Resubmit,
    Archive,
    MarkSafe,
    TriageArchive,
}

impl GovernanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceAction::Approve => "approve",
            GovernanceAction::Reject => "reject",
            GovernanceAction::RequestRevision => "request_revision",
            GovernanceAction::Resubmit => "resubmit",
            GovernanceAction::Archive => "archive",
            GovernanceAction::MarkSafe => "mark_safe",
            GovernanceAction::TriageArchive => "triage_archive",
        }
    }

    /// Review action producing the given outcome
    pub fn for_review_outcome(status: ContentStatus) -> Option<Self> {
        match status {
            ContentStatus::Approved => Some(GovernanceAction::Approve),
            ContentStatus::Rejected => Some(GovernanceAction::Reject),
            ContentStatus::RevisionRequested => Some(GovernanceAction::RequestRevision),
            ContentStatus::Pending | ContentStatus::Archived => None,
        }
    }

    pub fn requires_notes(&self) -> bool {
        matches!(
            self,
            GovernanceAction::Reject | GovernanceAction::RequestRevision
        )
    }

    /// Capability the actor needs; resubmission is gated on authorship instead
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            GovernanceAction::Approve
            | GovernanceAction::Reject
            | GovernanceAction::RequestRevision => Some(Capability::Review),
            GovernanceAction::Archive => Some(Capability::Archive),
            GovernanceAction::MarkSafe | GovernanceAction::TriageArchive => {
                Some(Capability::Triage)
            }
            GovernanceAction::Resubmit => None,
        }
    }

    pub fn records_decision(&self) -> bool {
        !matches!(self, GovernanceAction::Resubmit)
    }
}

impl fmt::Display for GovernanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Governance action illegal from the record's current state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} content {content_id} in status {from}{}", flag_suffix(.flagged))]
pub struct InvalidTransitionError {
    pub content_id: Uuid,
    pub from: ContentStatus,
    pub flagged: bool,
    pub action: GovernanceAction,
}

fn flag_suffix(flagged: &bool) -> &'static str {
    if *flagged {
        " (flagged)"
    } else {
        ""
    }
}

/// Status and flag after applying `action`, or None when illegal
pub fn next_state(
    status: ContentStatus,
    flagged: bool,
    action: GovernanceAction,
) -> Option<(ContentStatus, bool)> {
    use ContentStatus::*;
    use GovernanceAction::*;

    match (action, status, flagged) {
        (Approve, Pending, _) => Some((Approved, flagged)),
        (Reject, Pending, _) => Some((Rejected, flagged)),
        (RequestRevision, Pending, _) => Some((RevisionRequested, flagged)),
        (Resubmit, RevisionRequested, _) => Some((Pending, flagged)),
        (Archive, Approved, _) => Some((Archived, flagged)),
        (MarkSafe, Pending, true) => Some((Pending, false)),
        (TriageArchive, Pending, true) => Some((Archived, true)),
        _ => None,
    }
}
