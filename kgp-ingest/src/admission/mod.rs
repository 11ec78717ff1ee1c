//! Admission gate
//!
//! Every candidate, interactive or migrated, passes the same ordered steps:
//!
//! 1. Schema validation (reject on any violation)
//! 2. Duplicate detection (reject or flag at/above the threshold)
//! 3. Quality scoring (flag below the floor)
//! 4. Auto-tagging when no tags were supplied (failures never reject)
//!
//! A rejected candidate is reported through [`Admission::Rejected`]; only
//! systemic problems (the corpus cannot be read) surface as [`GateFault`].

pub mod duplicate;
pub mod quality;
pub mod schema;
pub mod tagging;

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    AdmissionParameters, ContentRecord, ContentStatus, MigrationConfig, Origin, RawCandidate,
};
use duplicate::{
    fingerprint, rank_matches, ComparableText, ContentCorpus, DuplicateAssessment, DuplicateMatch,
    SimilarityModel, TextSimilarity,
};
use quality::{HeuristicQualityScorer, QualityModel};
use schema::ValidCandidate;
use tagging::AutoTagger;

/// Quality issue recorded on a duplicate imported with skipping disabled
pub const ISSUE_POSSIBLE_DUPLICATE: &str = "possible_duplicate";

/// One invalid field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Candidate or request failed field validation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("invalid fields: {}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

fn summarize(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{} ({})", v.field, v.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation::new(field, message)],
        }
    }

    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }
}

/// Candidate is too similar to existing content
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("duplicate of existing content (similarity {score:.2} >= threshold {threshold:.2})")]
pub struct DuplicateError {
    pub score: f64,
    pub threshold: f64,
    /// Nearest existing records, best first
    pub matches: Vec<DuplicateMatch>,
}

/// Systemic failure inside the gate
#[derive(Debug, Error)]
pub enum GateFault {
    #[error("content corpus unavailable: {0}")]
    Corpus(#[source] kgp_common::Error),
}

/// Why a candidate was refused
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Validation(ValidationError),
    Duplicate(DuplicateError),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Validation(e) => write!(f, "validation failed: {}", e),
            Rejection::Duplicate(e) => write!(f, "{}", e),
        }
    }
}

/// Outcome of admitting one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Ready to enter the normal review queue
    Accepted(ContentRecord),
    /// Ready to store, but routed to the quality-review lane
    Flagged {
        record: ContentRecord,
        reasons: Vec<String>,
    },
    Rejected(Rejection),
}

impl Admission {
    pub fn record(&self) -> Option<&ContentRecord> {
        match self {
            Admission::Accepted(record) | Admission::Flagged { record, .. } => Some(record),
            Admission::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected(_))
    }
}

/// Per-call gate behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmitOptions {
    /// Reject duplicates (true) or store them flagged (false)
    pub skip_duplicates: bool,
    /// Flag records scoring below the quality floor
    pub enforce_quality_floor: bool,
    pub origin: Origin,
    /// Becomes the author when the candidate names none
    pub submitted_by: String,
}

impl AdmitOptions {
    /// Options for an interactive submission
    pub fn interactive(submitted_by: impl Into<String>, skip_duplicates: bool) -> Self {
        Self {
            skip_duplicates,
            enforce_quality_floor: true,
            origin: Origin::Direct,
            submitted_by: submitted_by.into(),
        }
    }

    /// Options derived from a migration job's configuration
    pub fn for_migration(config: &MigrationConfig, initiator: impl Into<String>) -> Self {
        Self {
            skip_duplicates: config.skip_duplicates,
            enforce_quality_floor: config.validate_before_import,
            origin: Origin::Migrated,
            submitted_by: initiator.into(),
        }
    }
}

/// The single admission path shared by interactive and migrated content
#[derive(Clone)]
pub struct AdmissionGate {
    corpus: Arc<dyn ContentCorpus>,
    similarity: Arc<dyn SimilarityModel>,
    quality: Arc<dyn QualityModel>,
    tagger: AutoTagger,
    params: AdmissionParameters,
}

impl AdmissionGate {
    /// Gate with the default similarity and quality models
    pub fn new(corpus: Arc<dyn ContentCorpus>, params: AdmissionParameters) -> Self {
        Self {
            corpus,
            similarity: Arc::new(TextSimilarity::default()),
            quality: Arc::new(HeuristicQualityScorer::from_parameters(&params)),
            tagger: AutoTagger::new(params.max_auto_tags),
            params,
        }
    }

    pub fn with_similarity_model(mut self, model: Arc<dyn SimilarityModel>) -> Self {
        self.similarity = model;
        self
    }

    pub fn with_quality_model(mut self, model: Arc<dyn QualityModel>) -> Self {
        self.quality = model;
        self
    }

    pub fn parameters(&self) -> &AdmissionParameters {
        &self.params
    }

    /// Run all gate steps against one candidate
    ///
    /// The returned record is not persisted; the caller stores it.
    pub async fn admit(
        &self,
        candidate: &RawCandidate,
        options: &AdmitOptions,
    ) -> Result<Admission, GateFault> {
        // Step 1: schema
        let valid = match schema::validate(candidate) {
            Ok(valid) => valid,
            Err(e) => {
                debug!(candidate = %candidate.label(), error = %e, "Candidate failed validation");
                return Ok(Admission::Rejected(Rejection::Validation(e)));
            }
        };

        // Step 2: duplicates
        let fingerprint = fingerprint(&valid.title, &valid.description);
        let duplicates = self.assess_duplicates(&valid, &fingerprint).await?;
        let is_duplicate = duplicates.score >= self.params.duplicate_threshold;

        if is_duplicate && options.skip_duplicates {
            debug!(
                candidate = %candidate.label(),
                score = duplicates.score,
                "Candidate rejected as duplicate"
            );
            return Ok(Admission::Rejected(Rejection::Duplicate(DuplicateError {
                score: duplicates.score,
                threshold: self.params.duplicate_threshold,
                matches: duplicates.matches,
            })));
        }

        // Step 3: quality
        let assessment = self.quality.assess(&valid);
        let mut issues = assessment.issues;
        let mut reasons = Vec::new();

        if is_duplicate {
            issues.push(ISSUE_POSSIBLE_DUPLICATE.to_string());
            reasons.push(format!(
                "similarity {:.2} to existing content",
                duplicates.score
            ));
        }
        if options.enforce_quality_floor && assessment.score < self.params.quality_floor {
            reasons.push(format!(
                "quality score {} below floor {}",
                assessment.score, self.params.quality_floor
            ));
        }

        // Step 4: tags (best effort, only when the caller supplied none)
        let tags = if valid.tags.is_empty() {
            self.tagger
                .suggest(&valid.title, &valid.description)
                .unwrap_or_else(|e| {
                    debug!(candidate = %candidate.label(), error = %e, "Auto-tagging skipped");
                    Default::default()
                })
        } else {
            valid.tags.clone()
        };

        let flagged = !reasons.is_empty();
        let record = ContentRecord {
            id: Uuid::new_v4(),
            title: valid.title,
            description: valid.description,
            category: valid.category,
            region: valid.region,
            tags,
            attachments: valid.attachments,
            origin: options.origin,
            external_ref: valid.external_id,
            quality_score: assessment.score,
            quality_issues: issues,
            duplicate_score: duplicates.score,
            fingerprint,
            status: ContentStatus::Pending,
            flagged,
            created_at: Utc::now(),
            author: valid.author.unwrap_or_else(|| options.submitted_by.clone()),
        };

        if flagged {
            Ok(Admission::Flagged { record, reasons })
        } else {
            Ok(Admission::Accepted(record))
        }
    }

    async fn assess_duplicates(
        &self,
        candidate: &ValidCandidate,
        fingerprint: &str,
    ) -> Result<DuplicateAssessment, GateFault> {
        if let Some(exact) = self
            .corpus
            .find_by_fingerprint(fingerprint)
            .await
            .map_err(GateFault::Corpus)?
        {
            return Ok(DuplicateAssessment::exact(&exact));
        }

        let entries = self
            .corpus
            .active_entries()
            .await
            .map_err(GateFault::Corpus)?;

        let text = ComparableText {
            title: &candidate.title,
            description: &candidate.description,
        };
        Ok(rank_matches(
            self.similarity.as_ref(),
            &text,
            &entries,
            self.params.max_duplicate_matches,
        ))
    }
}
