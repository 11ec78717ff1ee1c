//! Quality scoring (third gate step)
//!
//! Scores start at 100 and lose points per detected issue. A low score never
//! rejects a candidate; it only routes the record to the triage lane.

use std::collections::HashSet;

use super::schema::ValidCandidate;
use crate::models::AdmissionParameters;

pub const ISSUE_DESCRIPTION_TOO_SHORT: &str = "description_too_short";
pub const ISSUE_TITLE_TOO_SHORT: &str = "title_too_short";
pub const ISSUE_NO_CATEGORY_MATCH: &str = "no_category_match";
pub const ISSUE_SUSPICIOUS_REPETITION: &str = "suspicious_repetition";
pub const ISSUE_ALL_CAPS_TITLE: &str = "all_caps_title";

const PENALTY_DESCRIPTION_TOO_SHORT: u8 = 30;
const PENALTY_TITLE_TOO_SHORT: u8 = 10;
const PENALTY_NO_CATEGORY_MATCH: u8 = 15;
const PENALTY_SUSPICIOUS_REPETITION: u8 = 25;
const PENALTY_ALL_CAPS_TITLE: u8 = 10;

const MIN_TITLE_CHARS: usize = 8;

/// Score in 0-100 plus the issue codes that lowered it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityAssessment {
    pub score: u8,
    pub issues: Vec<String>,
}

/// Quality contract: deterministic for a given candidate
pub trait QualityModel: Send + Sync {
    fn assess(&self, candidate: &ValidCandidate) -> QualityAssessment;
}

/// Rule-based scorer over length, category fit, and repetition
#[derive(Debug, Clone)]
pub struct HeuristicQualityScorer {
    min_description_chars: usize,
    min_title_chars: usize,
}

impl Default for HeuristicQualityScorer {
    fn default() -> Self {
        Self::from_parameters(&AdmissionParameters::default())
    }
}

impl HeuristicQualityScorer {
    pub fn from_parameters(params: &AdmissionParameters) -> Self {
        Self {
            min_description_chars: params.min_description_chars,
            min_title_chars: MIN_TITLE_CHARS,
        }
    }
}

impl QualityModel for HeuristicQualityScorer {
    fn assess(&self, candidate: &ValidCandidate) -> QualityAssessment {
        let mut score: u8 = 100;
        let mut issues = Vec::new();
        let mut penalize = |issue: &str, points: u8| {
            score = score.saturating_sub(points);
            issues.push(issue.to_string());
        };

        if candidate.description.chars().count() < self.min_description_chars {
            penalize(ISSUE_DESCRIPTION_TOO_SHORT, PENALTY_DESCRIPTION_TOO_SHORT);
        }
        if candidate.title.chars().count() < self.min_title_chars {
            penalize(ISSUE_TITLE_TOO_SHORT, PENALTY_TITLE_TOO_SHORT);
        }

        let words = words(&format!("{} {}", candidate.title, candidate.description));

        let keywords = candidate.category.keywords();
        let category_match = words
            .iter()
            .any(|word| keywords.iter().any(|kw| word.starts_with(kw)));
        if !category_match {
            penalize(ISSUE_NO_CATEGORY_MATCH, PENALTY_NO_CATEGORY_MATCH);
        }

        if is_repetitive(&words, &candidate.description) {
            penalize(ISSUE_SUSPICIOUS_REPETITION, PENALTY_SUSPICIOUS_REPETITION);
        }
        if is_shouting(&candidate.title) {
            penalize(ISSUE_ALL_CAPS_TITLE, PENALTY_ALL_CAPS_TITLE);
        }

        QualityAssessment { score, issues }
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Same word three times in a row, a six-character run, or very low
/// vocabulary in a text of some length
fn is_repetitive(words: &[String], description: &str) -> bool {
    let stutter = words
        .windows(3)
        .any(|w| w[0] == w[1] && w[1] == w[2]);

    let mut run = 1;
    let mut char_run = false;
    let mut previous = None;
    for c in description.chars().filter(|c| !c.is_whitespace()) {
        if Some(c) == previous {
            run += 1;
            if run >= 6 {
                char_run = true;
                break;
            }
        } else {
            run = 1;
        }
        previous = Some(c);
    }

    let low_vocabulary = words.len() >= 8 && {
        let distinct: HashSet<&String> = words.iter().collect();
        (distinct.len() as f64 / words.len() as f64) < 0.3
    };

    stutter || char_run || low_vocabulary
}

fn is_shouting(title: &str) -> bool {
    let letters: Vec<char> = title.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= MIN_TITLE_CHARS && letters.iter().all(|c| c.is_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use std::collections::BTreeSet;

    fn candidate(title: &str, description: &str, category: Category) -> ValidCandidate {
        ValidCandidate {
            external_id: None,
            title: title.to_string(),
            description: description.to_string(),
            category,
            region: None,
            tags: BTreeSet::new(),
            attachments: vec![],
            author: None,
        }
    }

    #[test]
    fn test_good_candidate_scores_full() {
        let scorer = HeuristicQualityScorer::default();
        let assessment = scorer.assess(&candidate(
            "Release approval workflow",
            "Every release needs sign-off from the owning team and the on-call engineer before deploy.",
            Category::Process,
        ));
        assert_eq!(assessment.score, 100);
        assert!(assessment.issues.is_empty());
    }

    #[test]
    fn test_short_description_without_category_fit() {
        let scorer = HeuristicQualityScorer::default();
        let assessment = scorer.assess(&candidate(
            "Coffee machine",
            "It is broken.",
            Category::Policy,
        ));
        assert_eq!(assessment.score, 55);
        assert_eq!(
            assessment.issues,
            vec![ISSUE_DESCRIPTION_TOO_SHORT, ISSUE_NO_CATEGORY_MATCH]
        );
    }

    #[test]
    fn test_spam_scores_below_default_floor() {
        let scorer = HeuristicQualityScorer::default();
        let assessment = scorer.assess(&candidate(
            "test test",
            "test test test test test test",
            Category::Technical,
        ));
        assert!(assessment.score < AdmissionParameters::default().quality_floor);
        assert!(assessment
            .issues
            .contains(&ISSUE_SUSPICIOUS_REPETITION.to_string()));
    }

    #[test]
    fn test_all_caps_title_penalized() {
        let scorer = HeuristicQualityScorer::default();
        let assessment = scorer.assess(&candidate(
            "READ THIS NETWORK GUIDE",
            "Describes the office network layout, VLANs, and the guest access server.",
            Category::Technical,
        ));
        assert_eq!(assessment.issues, vec![ISSUE_ALL_CAPS_TITLE]);
        assert_eq!(assessment.score, 90);
    }

    #[test]
    fn test_character_runs_count_as_repetition() {
        let words = words("urgent!!!!!! please read");
        assert!(is_repetitive(&words, "urgent!!!!!! please read"));
        assert!(!is_repetitive(&words, "urgent! please read"));
    }
}
