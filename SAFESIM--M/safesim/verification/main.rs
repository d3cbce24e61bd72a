/// Fact-by-fact matching cascade.
pub mod matcher;
/// Verification verdicts.
pub mod result;
/// Strictness tiers and thresholds.
pub mod strictness;
/// The verifier.
pub mod verifier;

pub use matcher::{contains_term, fuzzy_immutable_match, match_fact, normalize_for_match, MatchKind};
pub use result::{VerificationResult, VerificationStatus, GENERATION_FAILED};
pub use strictness::{ParseStrictnessError, Strictness, Threshold, ThresholdTable};
pub use verifier::Verifier;
