use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Verification tier controlling the score threshold and missing-fact tolerance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Score >= 0.95, no missing immutable facts.
    #[default]
    High,
    /// Score >= 0.85, at most one missing transformable fact.
    Medium,
    /// Score >= 0.75, at most two missing transformable facts.
    Low,
}

impl Strictness {
    /// All tiers, strictest first.
    pub const ALL: [Self; 3] = [Self::High, Self::Medium, Self::Low];

    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized strictness name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown strictness '{0}' (expected high, medium or low)")]
pub struct ParseStrictnessError(pub String);

impl FromStr for Strictness {
    type Err = ParseStrictnessError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" | "strict" => Ok(Self::High),
            "medium" | "moderate" => Ok(Self::Medium),
            "low" | "lenient" => Ok(Self::Low),
            other => Err(ParseStrictnessError(other.to_string())),
        }
    }
}

/// Acceptance rule for one strictness tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Threshold {
    /// Minimum score for SAFE.
    pub min_score: f64,
    /// Missing transformable facts tolerated; `None` leaves it to the score.
    #[serde(default)]
    pub max_missing_transformable: Option<usize>,
}

impl Threshold {
    /// Creates a threshold.
    #[must_use]
    pub const fn new(min_score: f64, max_missing_transformable: Option<usize>) -> Self {
        Self {
            min_score,
            max_missing_transformable,
        }
    }
}

fn default_high() -> Threshold {
    Threshold::new(0.95, None)
}

fn default_medium() -> Threshold {
    Threshold::new(0.85, Some(1))
}

fn default_low() -> Threshold {
    Threshold::new(0.75, Some(2))
}

/// Per-tier thresholds (`[thresholds.high|medium|low]`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThresholdTable {
    /// High tier.
    #[serde(default = "default_high")]
    pub high: Threshold,
    /// Medium tier.
    #[serde(default = "default_medium")]
    pub medium: Threshold,
    /// Low tier.
    #[serde(default = "default_low")]
    pub low: Threshold,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            high: default_high(),
            medium: default_medium(),
            low: default_low(),
        }
    }
}

impl ThresholdTable {
    /// Threshold for `strictness`.
    #[must_use]
    pub const fn get(&self, strictness: Strictness) -> Threshold {
        match strictness {
            Strictness::High => self.high,
            Strictness::Medium => self.medium,
            Strictness::Low => self.low,
        }
    }

    /// Checks that scores are in `[0, 1]` and tiers do not get stricter as they go down.
    pub fn validate(&self) -> Result<(), String> {
        for strictness in Strictness::ALL {
            let score = self.get(strictness).min_score;
            if !(0.0..=1.0).contains(&score) {
                return Err(format!("{strictness} min_score {score} outside [0, 1]"));
            }
        }
        if self.medium.min_score > self.high.min_score || self.low.min_score > self.medium.min_score
        {
            return Err("min_score must not increase from high to low".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names() {
        assert_eq!("HIGH".parse::<Strictness>().unwrap(), Strictness::High);
        assert_eq!(" medium ".parse::<Strictness>().unwrap(), Strictness::Medium);
        assert_eq!("lenient".parse::<Strictness>().unwrap(), Strictness::Low);
        let err = "extreme".parse::<Strictness>().unwrap_err();
        assert!(err.to_string().contains("extreme"));
        assert_eq!(Strictness::default(), Strictness::High);
    }

    #[test]
    fn default_table_matches_tiers() {
        let table = ThresholdTable::default();
        assert_eq!(table.get(Strictness::High), Threshold::new(0.95, None));
        assert_eq!(table.get(Strictness::Medium), Threshold::new(0.85, Some(1)));
        assert_eq!(table.get(Strictness::Low), Threshold::new(0.75, Some(2)));
        assert!(table.validate().is_ok());
    }

    #[test]
    fn validation_rejects_inverted_tiers() {
        let table = ThresholdTable {
            low: Threshold::new(0.99, Some(2)),
            ..ThresholdTable::default()
        };
        assert!(table.validate().is_err());
        let table = ThresholdTable {
            high: Threshold::new(1.5, None),
            ..ThresholdTable::default()
        };
        assert!(table.validate().is_err());
    }
}
