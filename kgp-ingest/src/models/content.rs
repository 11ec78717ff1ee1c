//! Content records and raw admission candidates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Fixed set of knowledge categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BestPractice,
    LessonsLearned,
    Process,
    Technical,
    Policy,
    Training,
    Documentation,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::BestPractice,
        Category::LessonsLearned,
        Category::Process,
        Category::Technical,
        Category::Policy,
        Category::Training,
        Category::Documentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::BestPractice => "best_practice",
            Category::LessonsLearned => "lessons_learned",
            Category::Process => "process",
            Category::Technical => "technical",
            Category::Policy => "policy",
            Category::Training => "training",
            Category::Documentation => "documentation",
        }
    }

    /// Words whose presence suggests content fits this category
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Category::BestPractice => &["best", "practice", "recommend", "guideline", "tip", "should"],
            Category::LessonsLearned => &["lesson", "learned", "mistake", "retrospective", "incident", "postmortem"],
            Category::Process => &["process", "workflow", "procedure", "step", "approval", "handoff"],
            Category::Technical => &["system", "code", "configuration", "api", "server", "network", "database"],
            Category::Policy => &["policy", "rule", "compliance", "regulation", "must", "requirement"],
            Category::Training => &["training", "course", "learn", "tutorial", "onboarding", "exercise"],
            Category::Documentation => &["document", "guide", "manual", "reference", "how", "overview"],
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts the wire form ("best_practice") and common human spellings
    /// ("Best Practice", "best-practice"), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_lowercase() })
            .collect();

        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown category '{}'", s.trim()))
    }
}

/// Governance status of a content record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Pending,
    Approved,
    Rejected,
    RevisionRequested,
    Archived,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "pending",
            ContentStatus::Approved => "approved",
            ContentStatus::Rejected => "rejected",
            ContentStatus::RevisionRequested => "revision_requested",
            ContentStatus::Archived => "archived",
        }
    }

    /// Statuses whose records count as existing content for duplicate checks
    pub const ACTIVE: [ContentStatus; 3] = [
        ContentStatus::Pending,
        ContentStatus::Approved,
        ContentStatus::RevisionRequested,
    ];
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ContentStatus::Pending),
            "approved" => Ok(ContentStatus::Approved),
            "rejected" => Ok(ContentStatus::Rejected),
            "revision_requested" => Ok(ContentStatus::RevisionRequested),
            "archived" => Ok(ContentStatus::Archived),
            other => Err(format!("unknown content status '{}'", other)),
        }
    }
}

/// How a record entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Direct,
    Migrated,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Direct => "direct",
            Origin::Migrated => "migrated",
        }
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Origin::Direct),
            "migrated" => Ok(Origin::Migrated),
            other => Err(format!("unknown origin '{}'", other)),
        }
    }
}

/// Reference to a blob held by the external attachment store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Opaque blob handle
    pub handle: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Candidate as submitted interactively or read from a source connector
///
/// Every field is optional on the wire so schema validation can report all
/// missing fields at once instead of failing deserialization on the first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    /// Identifier in the originating system, used in job logs
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    /// Author in the originating system; defaults to the submitter
    #[serde(default)]
    pub author: Option<String>,
}

impl RawCandidate {
    /// Short label for log lines: external id and/or title
    pub fn label(&self) -> String {
        let title = self.title.trim();
        match (&self.external_id, title.is_empty()) {
            (Some(id), false) => format!("{} \"{}\"", id, title),
            (Some(id), true) => id.clone(),
            (None, false) => format!("\"{}\"", title),
            (None, true) => "<untitled>".to_string(),
        }
    }
}

/// A unit of knowledge owned by the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub region: Option<String>,
    pub tags: BTreeSet<String>,
    pub attachments: Vec<AttachmentRef>,
    pub origin: Origin,
    /// Identifier in the originating system (migrated records)
    pub external_ref: Option<String>,
    /// 0-100, set at admission
    pub quality_score: u8,
    pub quality_issues: Vec<String>,
    /// 0.0-1.0 similarity to the nearest existing record, set at admission
    pub duplicate_score: f64,
    /// SHA-256 of normalized title and description
    pub fingerprint: String,
    pub status: ContentStatus,
    /// In the quality-review lane; orthogonal to status
    pub flagged: bool,
    pub created_at: DateTime<Utc>,
    pub author: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parses_human_spellings() {
        assert_eq!("Best Practice".parse::<Category>(), Ok(Category::BestPractice));
        assert_eq!("lessons-learned".parse::<Category>(), Ok(Category::LessonsLearned));
        assert_eq!(" TECHNICAL ".parse::<Category>(), Ok(Category::Technical));
        assert!("gossip".parse::<Category>().is_err());
        assert!("".parse::<Category>().is_err());
    }

    #[test]
    fn test_status_round_trips_through_column_form() {
        for status in [
            ContentStatus::Pending,
            ContentStatus::Approved,
            ContentStatus::Rejected,
            ContentStatus::RevisionRequested,
            ContentStatus::Archived,
        ] {
            assert_eq!(status.as_str().parse::<ContentStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_candidate_label() {
        let mut candidate = RawCandidate {
            external_id: Some("KB-7".to_string()),
            title: "VPN setup".to_string(),
            ..RawCandidate::default()
        };
        assert_eq!(candidate.label(), "KB-7 \"VPN setup\"");

        candidate.title.clear();
        assert_eq!(candidate.label(), "KB-7");

        candidate.external_id = None;
        assert_eq!(candidate.label(), "<untitled>");
    }
}
