//! Auto-tagging (final gate step, best effort)

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

const MIN_TERM_CHARS: usize = 4;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "always", "because", "been", "before",
    "being", "below", "between", "both", "cannot", "could", "does", "doing", "down", "during",
    "each", "every", "from", "further", "have", "having", "here", "into", "itself", "just",
    "like", "made", "make", "many", "more", "most", "much", "need", "needs", "only", "other",
    "over", "same", "should", "some", "such", "than", "that", "their", "them", "then", "there",
    "these", "they", "this", "those", "through", "under", "until", "upon", "used", "using",
    "very", "were", "what", "when", "where", "which", "while", "will", "with", "within",
    "without", "would", "your",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaggingError {
    #[error("no taggable terms in title or description")]
    NoTerms,
}

/// Frequency-based keyword extractor; title terms count double
#[derive(Debug, Clone)]
pub struct AutoTagger {
    max_tags: usize,
}

impl AutoTagger {
    pub fn new(max_tags: usize) -> Self {
        Self { max_tags }
    }

    /// Up to `max_tags` suggested tags, most frequent first
    pub fn suggest(&self, title: &str, description: &str) -> Result<BTreeSet<String>, TaggingError> {
        if self.max_tags == 0 {
            return Ok(BTreeSet::new());
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for term in terms(title) {
            *counts.entry(term).or_insert(0) += 2;
        }
        for term in terms(description) {
            *counts.entry(term).or_insert(0) += 1;
        }

        if counts.is_empty() {
            return Err(TaggingError::NoTerms);
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(ranked
            .into_iter()
            .take(self.max_tags)
            .map(|(term, _)| term)
            .collect())
    }
}

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= MIN_TERM_CHARS)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
}
