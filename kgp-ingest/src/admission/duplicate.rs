//! Duplicate detection (second gate step)
//!
//! Two layers:
//! 1. Exact: SHA-256 fingerprint of the normalized title and description.
//! 2. Fuzzy: a pluggable [`SimilarityModel`] scored against every active
//!    record in the corpus.
//!
//! The corpus is read-shared. Nothing here locks it, so concurrent jobs can
//! admit near-duplicates of each other when they race.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

/// Title and description pair compared by a similarity model
#[derive(Debug, Clone, Copy)]
pub struct ComparableText<'a> {
    pub title: &'a str,
    pub description: &'a str,
}

/// Existing record as seen by duplicate detection
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusEntry {
    pub id: Uuid,
    pub title: String,
    pub description: String,
}

impl CorpusEntry {
    pub fn text(&self) -> ComparableText<'_> {
        ComparableText {
            title: &self.title,
            description: &self.description,
        }
    }
}

/// Read access to already accepted content
#[async_trait]
pub trait ContentCorpus: Send + Sync {
    /// Active record with exactly this fingerprint, if any
    async fn find_by_fingerprint(&self, fingerprint: &str) -> kgp_common::Result<Option<CorpusEntry>>;

    /// All active records
    async fn active_entries(&self) -> kgp_common::Result<Vec<CorpusEntry>>;
}

/// Similarity contract: any score in [0.0, 1.0], 1.0 meaning identical
pub trait SimilarityModel: Send + Sync {
    fn similarity(&self, candidate: &ComparableText<'_>, existing: &ComparableText<'_>) -> f64;
}

/// Default model: normalized Levenshtein on titles, Sørensen-Dice on
/// descriptions, blended by `title_weight`
#[derive(Debug, Clone)]
pub struct TextSimilarity {
    title_weight: f64,
}

impl Default for TextSimilarity {
    fn default() -> Self {
        Self { title_weight: 0.6 }
    }
}

impl TextSimilarity {
    pub fn with_title_weight(title_weight: f64) -> Self {
        Self {
            title_weight: title_weight.clamp(0.0, 1.0),
        }
    }
}

impl SimilarityModel for TextSimilarity {
    fn similarity(&self, candidate: &ComparableText<'_>, existing: &ComparableText<'_>) -> f64 {
        let title = strsim::normalized_levenshtein(
            &normalize(candidate.title),
            &normalize(existing.title),
        );
        let description = strsim::sorensen_dice(
            &normalize(candidate.description),
            &normalize(existing.description),
        );

        (title * self.title_weight + description * (1.0 - self.title_weight)).clamp(0.0, 1.0)
    }
}

/// One nearby record reported with a duplicate finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub content_id: Uuid,
    pub title: String,
    pub score: f64,
}

/// Highest similarity found and the nearest matches, best first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateAssessment {
    pub score: f64,
    pub matches: Vec<DuplicateMatch>,
}

impl DuplicateAssessment {
    /// Assessment for an exact fingerprint hit
    pub fn exact(entry: &CorpusEntry) -> Self {
        Self {
            score: 1.0,
            matches: vec![DuplicateMatch {
                content_id: entry.id,
                title: entry.title.clone(),
                score: 1.0,
            }],
        }
    }
}

/// Score `candidate` against `entries`, keeping the `limit` nearest
pub fn rank_matches(
    model: &dyn SimilarityModel,
    candidate: &ComparableText<'_>,
    entries: &[CorpusEntry],
    limit: usize,
) -> DuplicateAssessment {
    let mut scored: Vec<DuplicateMatch> = entries
        .iter()
        .filter_map(|entry| {
            let score = model.similarity(candidate, &entry.text());
            if score.is_nan() {
                warn!(content_id = %entry.id, "Similarity model returned NaN; entry skipped");
                return None;
            }
            Some(DuplicateMatch {
                content_id: entry.id,
                title: entry.title.clone(),
                score: score.clamp(0.0, 1.0),
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));

    let score = scored.first().map(|m| m.score).unwrap_or(0.0);
    scored.truncate(limit);

    DuplicateAssessment {
        score,
        matches: scored,
    }
}

/// Lowercase, strip punctuation, collapse whitespace
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex SHA-256 of the normalized title and description
pub fn fingerprint(title: &str, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(title).as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize(description).as_bytes());
    format!("{:x}", hasher.finalize())
}
