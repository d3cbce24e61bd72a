use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Topic classification of an input text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceStatus {
    /// Clearly clinical text.
    Medical,
    /// Probably clinical, low confidence.
    LikelyMedical,
    /// Too few signals either way.
    Unclear,
    /// Off-topic text.
    Unrelated,
}

impl fmt::Display for RelevanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Medical => "MEDICAL",
            Self::LikelyMedical => "LIKELY_MEDICAL",
            Self::Unclear => "UNCLEAR",
            Self::Unrelated => "UNRELATED",
        })
    }
}

/// Gate verdict with the evidence behind it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelevanceAssessment {
    /// Classification.
    pub status: RelevanceStatus,
    /// Whether the gate would let the text through.
    pub is_relevant: bool,
    /// Signal strength in `[0, 1]`.
    pub confidence: f64,
    /// Up to five medical terms found.
    pub medical_indicators: Vec<String>,
    /// Up to five off-topic terms found.
    pub non_medical_indicators: Vec<String>,
    /// Human-readable reason.
    pub explanation: String,
}

/// Upstream topic check consulted before any extraction or generation.
pub trait RelevanceGate: Send + Sync {
    /// Classifies `text`.
    fn classify(&self, text: &str) -> RelevanceAssessment;
}

const STRONG_PATTERNS: &[&str] = &[
    r"(?i)\b\d+\.?\d*\s*(?:mg|g|mcg|ml|l|units?|iu|tablets?|capsules?)\b",
    r"(?i)\b(?:prescribed|prescription|medication|drug|dose|dosage)\b",
    r"(?i)\b(?:patient|diagnosis|diagnosed|symptom|treatment|therapy|clinical|medical|hospital|physician|doctor|nurse)\b",
    r"(?i)\b(?:hypertension|diabetes|bradycardia|tachycardia|hypotension|seizure|syncope|edema|dyspnea|dysuria)\b",
    r"(?i)\b(?:po|iv|im|sc|q\.?d\.?|b\.?i\.?d\.?|t\.?i\.?d\.?|q\.?i\.?d\.?|prn)\b",
    r"(?i)\b\d+/\d+\s*mmhg\b",
    r"(?i)\b\d+\.?\d*\s*°?[fc]\b",
    r"(?i)\b\d+\s*bpm\b",
    r"(?i)\b(?:atenolol|metformin|lisinopril|aspirin|warfarin|insulin|morphine|amoxicillin)\b",
];

const MODERATE_PATTERNS: &[&str] = &[
    r"(?i)\b(?:blood|heart|lung|liver|kidney|brain|muscle|bone|nerve|tissue|organ)\b",
    r"(?i)\b(?:pain|ache|fever|nausea|vomit|dizzy|weak|tired|fatigue|swollen|red|bleeding)\b",
    r"(?i)\b(?:test|exam|scan|x-ray|mri|ct|ultrasound|lab|laboratory|result)\b",
    r"(?i)\b(?:surgery|operation|procedure|injection|vaccine|antibiotic)\b",
];

const NON_MEDICAL_PATTERNS: &[&str] = &[
    r"(?i)\b(?:recipe|cooking|bake|fry|ingredient|flour|sugar|salt|pepper|oven|stove|kitchen)\b",
    r"(?i)\b(?:game|match|player|team|score|goal|tournament|championship|sport|football|basketball)\b",
    r"(?i)\b(?:computer|software|programming|code|algorithm|database|server|network|internet|website)\b",
    r"(?i)\b(?:stock|market|investment|profit|revenue|business|company|corporate|finance|banking)\b",
    r"(?i)\b(?:election|president|government|policy|law|legal|court|judge|lawyer|politics)\b",
    r"(?i)\b(?:travel|vacation|hotel|flight|airport|destination|tourist|sightseeing|beach|mountain)\b",
    r"(?i)\b(?:homework|assignment|exam|test|grade|student|teacher|school|university|college|course)\b",
    r"(?i)\b(?:shopping|store|buy|purchase|price|discount|sale|cart|checkout|product|item)\b",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).expect("relevance pattern compiles"))
        .collect()
}

static STRONG: Lazy<Vec<Regex>> = Lazy::new(|| compile(STRONG_PATTERNS));
static MODERATE: Lazy<Vec<Regex>> = Lazy::new(|| compile(MODERATE_PATTERNS));
static NON_MEDICAL: Lazy<Vec<Regex>> = Lazy::new(|| compile(NON_MEDICAL_PATTERNS));

const MAX_INDICATORS: usize = 5;

/// Counts matches across `patterns`, keeping at most `examples` per pattern.
fn scan(patterns: &[Regex], text: &str, examples: usize, sink: &mut Vec<String>) -> usize {
    let mut count = 0;
    for pattern in patterns {
        let found: Vec<&str> = pattern.find_iter(text).map(|m| m.as_str()).collect();
        count += found.len();
        sink.extend(found.into_iter().take(examples).map(str::to_string));
    }
    count
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: usize, denominator: f64) -> f64 {
    numerator as f64 / denominator
}

/// Weighted keyword classifier.
///
/// Strong medical signals weigh 3, moderate ones 1, off-topic ones 2.
/// `strict_mode` decides whether UNCLEAR text is let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordRelevanceGate {
    strict_mode: bool,
}

impl Default for KeywordRelevanceGate {
    fn default() -> Self {
        Self::new(true)
    }
}

impl KeywordRelevanceGate {
    /// Creates the gate.
    #[must_use]
    pub const fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    /// Whether UNCLEAR text is rejected.
    #[must_use]
    pub const fn strict_mode(&self) -> bool {
        self.strict_mode
    }
}

impl RelevanceGate for KeywordRelevanceGate {
    fn classify(&self, text: &str) -> RelevanceAssessment {
        let mut medical = Vec::new();
        let mut non_medical = Vec::new();
        let strong = scan(&STRONG, text, 3, &mut medical);
        let moderate = scan(&MODERATE, text, 2, &mut medical);
        let off_topic = scan(&NON_MEDICAL, text, 3, &mut non_medical);

        let medical_score = strong * 3 + moderate;
        let non_medical_score = off_topic * 2;
        let words = text.split_whitespace().count();
        let confidence = if words == 0 {
            0.0
        } else {
            let margin = medical_score.abs_diff(non_medical_score);
            ratio(margin, ratio(words, 2.0).max(1.0)).min(1.0)
        };

        let (status, is_relevant, explanation) = if non_medical_score > medical_score && off_topic >= 2 {
            (
                RelevanceStatus::Unrelated,
                false,
                format!(
                    "Text appears unrelated to medical content: {off_topic} off-topic indicators (e.g. {}) against {} medical ones. Only medical text is simplified.",
                    non_medical.iter().take(3).cloned().collect::<Vec<_>>().join(", "),
                    strong + moderate
                ),
            )
        } else if strong >= 2 || (strong >= 1 && moderate >= 2) {
            (
                RelevanceStatus::Medical,
                true,
                format!(
                    "Medical content detected: {strong} strong indicators (e.g. {}).",
                    medical.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
                ),
            )
        } else if strong >= 1 || moderate >= 3 {
            (
                RelevanceStatus::LikelyMedical,
                true,
                format!(
                    "Likely medical content: {strong} strong and {moderate} moderate indicators."
                ),
            )
        } else if medical_score > 0 {
            let is_relevant = !self.strict_mode;
            (
                RelevanceStatus::Unclear,
                is_relevant,
                format!(
                    "Relevance unclear: only {strong} strong and {moderate} moderate indicators. {}",
                    if is_relevant {
                        "Processing with caution."
                    } else {
                        "Rejected in strict mode."
                    }
                ),
            )
        } else {
            (
                RelevanceStatus::Unrelated,
                false,
                "No medical indicators found. Provide discharge summaries, clinical notes or medication instructions.".to_string(),
            )
        };

        medical.truncate(MAX_INDICATORS);
        non_medical.truncate(MAX_INDICATORS);
        RelevanceAssessment {
            status,
            is_relevant,
            confidence,
            medical_indicators: medical,
            non_medical_indicators: non_medical,
            explanation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> RelevanceAssessment {
        KeywordRelevanceGate::default().classify(text)
    }

    #[test]
    fn discharge_note_is_medical() {
        let result =
            classify("Patient prescribed 50mg Atenolol PO q.d. for hypertension. Monitor for bradycardia.");
        assert_eq!(result.status, RelevanceStatus::Medical);
        assert!(result.is_relevant);
        assert!(result.medical_indicators.len() <= MAX_INDICATORS);
        assert!(result.medical_indicators.iter().any(|term| term == "50mg"));
    }

    #[test]
    fn recipe_is_unrelated() {
        let result = classify("Mix 2 cups of flour with 1 cup of sugar. Bake at 350°F for 30 minutes.");
        assert_eq!(result.status, RelevanceStatus::Unrelated);
        assert!(!result.is_relevant);
        assert!(result.non_medical_indicators.contains(&"flour".to_string()));
    }

    #[test]
    fn sports_and_tech_are_unrelated() {
        for text in [
            "The team won the championship game with a score of 3-2.",
            "How to install Python on your computer?",
        ] {
            assert_eq!(classify(text).status, RelevanceStatus::Unrelated, "{text}");
        }
    }

    #[test]
    fn single_strong_signal_is_likely_medical() {
        let result = classify("Keep taking metformin with breakfast.");
        assert_eq!(result.status, RelevanceStatus::LikelyMedical);
    }

    #[test]
    fn unclear_depends_on_strict_mode() {
        let text = "My heart feels heavy today.";
        let strict = KeywordRelevanceGate::new(true).classify(text);
        assert_eq!(strict.status, RelevanceStatus::Unclear);
        assert!(!strict.is_relevant);
        let lenient = KeywordRelevanceGate::new(false).classify(text);
        assert!(lenient.is_relevant);
    }

    #[test]
    fn empty_text_has_zero_confidence() {
        let result = classify("");
        assert_eq!(result.status, RelevanceStatus::Unrelated);
        assert!(result.confidence.abs() < f64::EPSILON);
    }
}
