use std::sync::Arc;

use tracing::trace;

use crate::{
    fact::{Fact, FactSet},
    policy::TransformPolicy,
    verification::{
        matcher::{match_fact, MatchKind},
        result::{VerificationResult, VerificationStatus},
        strictness::{Strictness, ThresholdTable},
    },
};

const SCORE_TOLERANCE: f64 = 1e-9;

/// Deterministic checker comparing extracted facts with a candidate text.
#[derive(Debug, Clone)]
pub struct Verifier {
    policy: Arc<TransformPolicy>,
    thresholds: ThresholdTable,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(Arc::new(TransformPolicy::builtin()), ThresholdTable::default())
    }
}

impl Verifier {
    /// Creates a verifier over a shared policy table.
    #[must_use]
    pub const fn new(policy: Arc<TransformPolicy>, thresholds: ThresholdTable) -> Self {
        Self { policy, thresholds }
    }

    /// Transform policy in use.
    #[must_use]
    pub fn policy(&self) -> &TransformPolicy {
        &self.policy
    }

    /// Threshold table in use.
    #[must_use]
    pub const fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    /// Checks `candidate` against `facts`.
    ///
    /// Score is `found / total` (1.0 for no facts). SAFE requires the tier's
    /// minimum score, no missing immutable fact, and at most the tier's number
    /// of missing transformable facts.
    #[must_use]
    pub fn verify(&self, facts: &FactSet, candidate: &str, strictness: Strictness) -> VerificationResult {
        let mut found = FactSet::new();
        let mut missing: Vec<Fact> = Vec::new();
        let mut transformed: Vec<Fact> = Vec::new();
        for fact in facts {
            match match_fact(fact, candidate, &self.policy) {
                Some(kind) => {
                    trace!(fact = fact.text(), kind = ?kind, "fact found");
                    if kind == MatchKind::Transform {
                        transformed.push(fact.clone());
                    }
                    found.insert(fact.clone());
                }
                None => missing.push(fact.clone()),
            }
        }
        let score = if facts.is_empty() {
            1.0
        } else {
            to_f64(found.len()) / to_f64(facts.len())
        };
        let threshold = self.thresholds.get(strictness);
        let missing_transformable = missing.iter().filter(|fact| !fact.is_immutable()).count();
        let floor_held = missing.iter().all(|fact| !fact.is_immutable());
        let score_held = score + SCORE_TOLERANCE >= threshold.min_score;
        let tolerance_held = threshold
            .max_missing_transformable
            .map_or(true, |limit| missing_transformable <= limit);
        let status = if floor_held && score_held && tolerance_held {
            VerificationStatus::Safe
        } else {
            VerificationStatus::Unsafe
        };
        VerificationResult::new(status, score, strictness, missing, found, transformed)
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(value: usize) -> f64 {
    value as f64
}
