//! Admission and migration engine parameters
//!
//! Resolution order: settings table → TOML → compiled defaults.

use kgp_common::config::{AdmissionOverrides, MigrationOverrides};
use serde::{Deserialize, Serialize};

/// Admission gate thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionParameters {
    /// Similarity at or above which a candidate is a duplicate (default: 0.80)
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,

    /// Quality score below which a record is flagged for triage (default: 50)
    #[serde(default = "default_quality_floor")]
    pub quality_floor: u8,

    /// Nearest matches reported with a duplicate rejection (default: 3)
    #[serde(default = "default_max_duplicate_matches")]
    pub max_duplicate_matches: usize,

    /// Descriptions shorter than this lose quality points (default: 40)
    #[serde(default = "default_min_description_chars")]
    pub min_description_chars: usize,

    /// Upper bound on suggested tags (default: 5)
    #[serde(default = "default_max_auto_tags")]
    pub max_auto_tags: usize,
}

fn default_duplicate_threshold() -> f64 {
    0.80
}

fn default_quality_floor() -> u8 {
    50
}

fn default_max_duplicate_matches() -> usize {
    3
}

fn default_min_description_chars() -> usize {
    40
}

fn default_max_auto_tags() -> usize {
    5
}

impl Default for AdmissionParameters {
    fn default() -> Self {
        Self {
            duplicate_threshold: default_duplicate_threshold(),
            quality_floor: default_quality_floor(),
            max_duplicate_matches: default_max_duplicate_matches(),
            min_description_chars: default_min_description_chars(),
            max_auto_tags: default_max_auto_tags(),
        }
    }
}

impl AdmissionParameters {
    /// Apply TOML overrides on top of the current values
    pub fn with_overrides(mut self, overrides: &AdmissionOverrides) -> Self {
        if let Some(v) = overrides.duplicate_threshold {
            self.duplicate_threshold = v;
        }
        if let Some(v) = overrides.quality_floor {
            self.quality_floor = v;
        }
        if let Some(v) = overrides.max_duplicate_matches {
            self.max_duplicate_matches = v;
        }
        if let Some(v) = overrides.min_description_chars {
            self.min_description_chars = v;
        }
        if let Some(v) = overrides.max_auto_tags {
            self.max_auto_tags = v;
        }
        self
    }

    /// Reject out-of-range values before the gate uses them
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.duplicate_threshold) {
            return Err(format!(
                "duplicate_threshold must be within 0.0-1.0, got {}",
                self.duplicate_threshold
            ));
        }
        if self.quality_floor > 100 {
            return Err(format!(
                "quality_floor must be within 0-100, got {}",
                self.quality_floor
            ));
        }
        Ok(())
    }
}

/// Migration engine limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineParameters {
    /// Largest batch a job may request (default: 1000)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_max_batch_size() -> usize {
    1000
}

impl Default for EngineParameters {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl EngineParameters {
    pub fn with_overrides(mut self, overrides: &MigrationOverrides) -> Self {
        if let Some(v) = overrides.max_batch_size {
            self.max_batch_size = v;
        }
        self
    }
}
