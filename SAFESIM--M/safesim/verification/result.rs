use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    fact::{Fact, FactSet},
    verification::strictness::Strictness,
};

/// Label leading [`VerificationResult::missing_labels`] when generation failed.
pub const GENERATION_FAILED: &str = "generation failed";

/// Verdict of one verification pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Every required fact survived within the tier's tolerance.
    Safe,
    /// Facts were lost or generation failed.
    Unsafe,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Safe => "SAFE",
            Self::Unsafe => "UNSAFE",
        })
    }
}

/// Outcome of checking one candidate text against the extracted facts.
///
/// Built once per attempt by the verifier (or by [`VerificationResult::generation_failed`])
/// and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationResult {
    status: VerificationStatus,
    score: f64,
    strictness: Strictness,
    missing: Vec<Fact>,
    found: FactSet,
    #[serde(default)]
    transformed: Vec<Fact>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generation_error: Option<String>,
}

impl VerificationResult {
    pub(crate) fn new(
        status: VerificationStatus,
        score: f64,
        strictness: Strictness,
        missing: Vec<Fact>,
        found: FactSet,
        transformed: Vec<Fact>,
    ) -> Self {
        let warnings = missing
            .iter()
            .map(|fact| {
                if fact.is_immutable() {
                    format!("missing critical value: {} ({})", fact.surface(), fact.kind())
                } else {
                    format!("missing {}: {}", fact.kind(), fact.surface())
                }
            })
            .collect();
        Self {
            status,
            score,
            strictness,
            missing,
            found,
            transformed,
            warnings,
            generation_error: None,
        }
    }

    /// Unsafe result for an attempt whose generation step failed.
    ///
    /// Every fact is reported missing and the error is kept as the
    /// generation-failed marker.
    #[must_use]
    pub fn generation_failed(facts: &FactSet, strictness: Strictness, error: impl Into<String>) -> Self {
        let error = error.into();
        let mut result = Self::new(
            VerificationStatus::Unsafe,
            0.0,
            strictness,
            facts.to_vec(),
            FactSet::new(),
            Vec::new(),
        );
        result.warnings.insert(0, format!("{GENERATION_FAILED}: {error}"));
        result.generation_error = Some(error);
        result
    }

    /// Verdict.
    #[must_use]
    pub const fn status(&self) -> VerificationStatus {
        self.status
    }

    /// Whether the verdict is SAFE.
    #[must_use]
    pub fn is_safe(&self) -> bool {
        self.status == VerificationStatus::Safe
    }

    /// Fraction of facts found, in `[0, 1]`.
    #[must_use]
    pub const fn score(&self) -> f64 {
        self.score
    }

    /// Tier the verdict was computed under.
    #[must_use]
    pub const fn strictness(&self) -> Strictness {
        self.strictness
    }

    /// Facts not found, in extraction order.
    ///
    /// A failed generation lists every fact here; the failure itself is in
    /// [`Self::generation_error`] and leads [`Self::missing_labels`].
    #[must_use]
    pub fn missing(&self) -> &[Fact] {
        &self.missing
    }

    /// Everything the candidate lacks: [`GENERATION_FAILED`] first when the
    /// attempt produced no candidate, then the surface of each missing fact.
    #[must_use]
    pub fn missing_labels(&self) -> Vec<String> {
        self.generation_error
            .as_ref()
            .map(|_| GENERATION_FAILED.to_string())
            .into_iter()
            .chain(self.missing.iter().map(|fact| fact.surface().to_string()))
            .collect()
    }

    /// Missing facts that must appear verbatim.
    pub fn missing_immutable(&self) -> impl Iterator<Item = &Fact> {
        self.missing.iter().filter(|fact| fact.is_immutable())
    }

    /// Facts found.
    #[must_use]
    pub const fn found(&self) -> &FactSet {
        &self.found
    }

    /// Found facts that were satisfied only through an approved paraphrase.
    #[must_use]
    pub fn transformed(&self) -> &[Fact] {
        &self.transformed
    }

    /// Human-readable problems.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Adapter error for a failed generation attempt.
    #[must_use]
    pub fn generation_error(&self) -> Option<&str> {
        self.generation_error.as_deref()
    }

    /// Number of facts checked.
    #[must_use]
    pub fn total_facts(&self) -> usize {
        self.found.len() + self.missing.len()
    }

    /// One-paragraph explanation of the verdict.
    #[must_use]
    pub fn explain(&self) -> String {
        let total = self.total_facts();
        if let Some(error) = &self.generation_error {
            return format!(
                "UNSAFE: generation failed ({error}); none of the {total} required facts could be checked."
            );
        }
        let mut text = match self.status {
            VerificationStatus::Safe if self.missing.is_empty() => format!(
                "SAFE: all {total} required facts preserved (score {:.2}, {} strictness).",
                self.score, self.strictness
            ),
            VerificationStatus::Safe => format!(
                "SAFE: {} of {total} required facts preserved (score {:.2}, {} strictness); tolerated missing: {}.",
                self.found.len(),
                self.score,
                self.strictness,
                list(&self.missing)
            ),
            VerificationStatus::Unsafe => format!(
                "UNSAFE: {} of {total} required facts missing (score {:.2}, {} strictness). Missing: {}.",
                self.missing.len(),
                self.score,
                self.strictness,
                list(&self.missing)
            ),
        };
        let critical: Vec<Fact> = self.missing_immutable().cloned().collect();
        if !critical.is_empty() {
            text.push_str(&format!(" Critical values absent: {}.", list(&critical)));
        }
        if !self.transformed.is_empty() {
            text.push_str(&format!(
                " Accepted plain-language forms for: {}.",
                list(&self.transformed)
            ));
        }
        text
    }
}

fn list(facts: &[Fact]) -> String {
    facts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{FactKind, Span};

    fn facts() -> FactSet {
        [
            Fact::new(FactKind::Dosage, "50mg", Span::new(0, 4)),
            Fact::new(FactKind::Route, "PO", Span::new(5, 7)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn generation_failure_marks_everything_missing() {
        let result = VerificationResult::generation_failed(&facts(), Strictness::High, "timed out");
        assert!(!result.is_safe());
        assert!(result.score().abs() < f64::EPSILON);
        assert_eq!(result.missing().len(), 2);
        assert_eq!(result.generation_error(), Some("timed out"));
        assert_eq!(result.warnings()[0], "generation failed: timed out");
        assert!(result.explain().contains("generation failed"));
        assert_eq!(result.missing_labels(), ["generation failed", "50mg", "PO"]);
    }

    #[test]
    fn generation_failure_without_facts_still_reports_missing() {
        let result = VerificationResult::generation_failed(&FactSet::new(), Strictness::Low, "offline");
        assert!(!result.is_safe());
        assert!(result.missing().is_empty());
        assert_eq!(result.missing_labels(), [GENERATION_FAILED]);
    }

    #[test]
    fn explanation_lists_critical_values() {
        let all = facts();
        let dose = all.iter().next().unwrap().clone();
        let route = all.iter().nth(1).unwrap().clone();
        let result = VerificationResult::new(
            VerificationStatus::Unsafe,
            0.5,
            Strictness::Medium,
            vec![dose],
            std::iter::once(route.clone()).collect(),
            vec![route],
        );
        let text = result.explain();
        assert!(text.starts_with("UNSAFE: 1 of 2"));
        assert!(text.contains("Critical values absent: 50mg [DOSAGE]"));
        assert!(text.contains("Accepted plain-language forms for: PO [ROUTE]"));
        assert_eq!(result.warnings(), ["missing critical value: 50mg (DOSAGE)"]);
    }

    #[test]
    fn serializes_status_in_upper_case() {
        let result = VerificationResult::generation_failed(&FactSet::new(), Strictness::Low, "x");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "UNSAFE");
        assert_eq!(json["strictness"], "low");
    }
}
