//! Schema validation (first gate step)
//!
//! Cheap structural checks that run before any scoring. Every violated field
//! is reported, not just the first.

use std::collections::BTreeSet;

use super::{FieldViolation, ValidationError};
use crate::models::{AttachmentRef, Category, RawCandidate};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_TAG_CHARS: usize = 50;

/// Candidate that passed schema validation, with normalized fields
#[derive(Debug, Clone, PartialEq)]
pub struct ValidCandidate {
    pub external_id: Option<String>,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub region: Option<String>,
    pub tags: BTreeSet<String>,
    pub attachments: Vec<AttachmentRef>,
    pub author: Option<String>,
}

/// Validate and normalize a raw candidate
pub fn validate(candidate: &RawCandidate) -> Result<ValidCandidate, ValidationError> {
    let mut violations = Vec::new();

    let title = collapse_whitespace(&candidate.title);
    if title.is_empty() {
        violations.push(FieldViolation::new("title", "is required"));
    } else if title.chars().count() > MAX_TITLE_CHARS {
        violations.push(FieldViolation::new(
            "title",
            format!("exceeds {} characters", MAX_TITLE_CHARS),
        ));
    }

    let description = candidate.description.trim().to_string();
    if description.is_empty() {
        violations.push(FieldViolation::new("description", "is required"));
    }

    let category = if candidate.category.trim().is_empty() {
        violations.push(FieldViolation::new("category", "is required"));
        None
    } else {
        match candidate.category.parse::<Category>() {
            Ok(category) => Some(category),
            Err(reason) => {
                let expected: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
                violations.push(FieldViolation::new(
                    "category",
                    format!("{}; expected one of {}", reason, expected.join(", ")),
                ));
                None
            }
        }
    };

    let mut tags = BTreeSet::new();
    for (index, raw) in candidate.tags.iter().enumerate() {
        let tag = normalize_tag(raw);
        if tag.is_empty() {
            violations.push(FieldViolation::new(format!("tags[{}]", index), "must not be blank"));
        } else if tag.chars().count() > MAX_TAG_CHARS {
            violations.push(FieldViolation::new(
                format!("tags[{}]", index),
                format!("exceeds {} characters", MAX_TAG_CHARS),
            ));
        } else {
            tags.insert(tag);
        }
    }

    for (index, attachment) in candidate.attachments.iter().enumerate() {
        if attachment.handle.trim().is_empty() {
            violations.push(FieldViolation::new(
                format!("attachments[{}].handle", index),
                "is required",
            ));
        }
    }

    if !violations.is_empty() {
        return Err(ValidationError { violations });
    }

    // category is Some whenever no violation was recorded for it
    let category = category.ok_or_else(|| ValidationError::single("category", "is required"))?;

    Ok(ValidCandidate {
        external_id: non_blank(candidate.external_id.as_deref()),
        title,
        description,
        category,
        region: non_blank(candidate.region.as_deref()),
        tags,
        attachments: candidate.attachments.clone(),
        author: non_blank(candidate.author.as_deref()),
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_tag(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
