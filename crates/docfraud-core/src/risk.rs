use std::fmt;

use serde::{Deserialize, Serialize};

/// Boundaries that map a `[0, 1]` risk score onto a [`RiskLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub low_max: f64,
    pub medium_max: f64,
    /// Kept as configuration surface; classification does not consult it.
    pub high_min: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low_max: 0.3,
            medium_max: 0.7,
            high_min: 0.8,
        }
    }
}

impl RiskThresholds {
    /// Classify a score. Total over all inputs: out-of-range values are not rejected.
    pub fn classify(&self, score: f64) -> RiskLevel {
        if score <= self.low_max {
            RiskLevel::Low
        } else if score <= self.medium_max {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

/// Ordinal fraud-risk label derived from the model's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
