use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::fact::{Fact, FactKind, Span};

/// Declarative pattern for a structurally regular fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternSpec {
    /// Short name used in diagnostics (`dosage`, `blood_pressure`, ...).
    pub name: String,
    /// Kind assigned to every match.
    pub kind: FactKind,
    /// Regular expression (Rust `regex` syntax).
    pub pattern: String,
    /// Confidence attached to matches.
    #[serde(default = "default_pattern_confidence")]
    pub confidence: f32,
}

const fn default_pattern_confidence() -> f32 {
    1.0
}

impl PatternSpec {
    /// Creates a spec.
    #[must_use]
    pub fn new(name: &str, kind: FactKind, pattern: &str, confidence: f32) -> Self {
        Self {
            name: name.into(),
            kind,
            pattern: pattern.into(),
            confidence,
        }
    }

    /// Built-in catalog for dosages, vitals, routes and frequencies.
    #[must_use]
    pub fn builtin() -> Vec<Self> {
        vec![
            Self::new(
                "dosage",
                FactKind::Dosage,
                r"(?i)\b\d+(?:[.,]\d+)?\s*(?:mcg|µg|mg|g|ml|l|units?|iu|tablets?|capsules?|drops?|puffs?|meq|mmol)\b",
                1.0,
            ),
            Self::new(
                "blood_pressure",
                FactKind::Vital,
                r"(?i)\b\d{2,3}\s*/\s*\d{2,3}\s*mm\s*hg\b",
                1.0,
            ),
            Self::new(
                "temperature",
                FactKind::Vital,
                r"(?i)\b\d{2,3}(?:\.\d+)?\s*(?:°\s*[fc]|(?:degrees?\s+)?(?:fahrenheit|celsius))\b|\b\d{2,3}\.\d+\s*[fc]\b",
                1.0,
            ),
            Self::new(
                "pulse",
                FactKind::Vital,
                r"(?i)\b\d{2,3}\s*(?:bpm|beats\s+per\s+minute)\b",
                1.0,
            ),
            Self::new(
                "oxygen_saturation",
                FactKind::Vital,
                r"(?i)\b\d{2,3}(?:\.\d+)?\s*%\s*(?:o2|oxygen|spo2|sat(?:uration)?)\b|\bspo2\s*(?:of\s+)?\d{2,3}\s*%",
                1.0,
            ),
            Self::new(
                "respiratory_rate",
                FactKind::Vital,
                r"(?i)\b\d{1,2}\s*breaths?\s*(?:/\s*|per\s+)min(?:ute)?\b",
                1.0,
            ),
            Self::new(
                "route_abbreviation",
                FactKind::Route,
                r"\b(?:PO|IV|IM|SC|SQ|SL|po|iv|sc|sq)\b|\b[pP]\.[oO]\.|\b[iI]\.[vV]\.",
                0.9,
            ),
            Self::new(
                "route_spelled",
                FactKind::Route,
                r"(?i)\b(?:by\s+mouth|subcut(?:aneous(?:ly)?)?|oral(?:ly)?|intravenous(?:ly)?|intramuscular(?:ly)?|topical(?:ly)?|inhaled|sublingual(?:ly)?|transdermal(?:ly)?)\b",
                0.9,
            ),
            Self::new(
                "frequency_abbreviation",
                FactKind::Frequency,
                r"(?i)\b(?:[bqt]\.?i\.?d|q\.?d|q\.?h\.?s|q\.?\d{1,2}\.?h|p\.?r\.?n|q\.?a\.?m|q\.?p\.?m)(?:\.|\b)",
                0.95,
            ),
            Self::new(
                "frequency_spelled",
                FactKind::Frequency,
                r"(?i)\b(?:once|twice|three\s+times|four\s+times)\s+(?:a\s+day|daily|per\s+day|a\s+week|weekly|per\s+week)\b|\bevery\s+\d+(?:\s*(?:-|to)\s*\d+)?\s+(?:hours?|days?|weeks?)\b|\b(?:daily|nightly|at\s+bedtime|as\s+needed)\b",
                0.95,
            ),
        ]
    }
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    name: String,
    kind: FactKind,
    regex: Regex,
    confidence: f32,
}

/// Compiled pattern set applied by the extractor.
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    patterns: Vec<CompiledPattern>,
}

static BUILTIN: Lazy<PatternCatalog> = Lazy::new(|| {
    PatternCatalog::from_specs(&PatternSpec::builtin()).expect("built-in extraction patterns compile")
});

impl PatternCatalog {
    /// Compiles the given specs in order.
    pub fn from_specs(specs: &[PatternSpec]) -> Result<Self, regex::Error> {
        let patterns = specs
            .iter()
            .map(|spec| {
                Ok(CompiledPattern {
                    name: spec.name.clone(),
                    kind: spec.kind,
                    regex: Regex::new(&spec.pattern)?,
                    confidence: spec.confidence.clamp(0.0, 1.0),
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { patterns })
    }

    /// Shared built-in catalog.
    #[must_use]
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Built-in catalog followed by `extra` specs.
    pub fn builtin_with(extra: &[PatternSpec]) -> Result<Self, regex::Error> {
        let mut catalog = Self::builtin();
        catalog.patterns.extend(Self::from_specs(extra)?.patterns);
        Ok(catalog)
    }

    /// Number of patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the catalog has no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Runs every pattern and resolves overlaps.
    ///
    /// Overlapping matches keep the earliest start, then the longest match.
    #[must_use]
    pub fn detect(&self, text: &str) -> Vec<Fact> {
        let mut hits: Vec<(Span, FactKind, f32)> = Vec::new();
        for pattern in &self.patterns {
            for found in pattern.regex.find_iter(text) {
                let raw = found.as_str();
                let trimmed = raw.trim_end();
                if trimmed.is_empty() {
                    continue;
                }
                let start = found.start() + (trimmed.len() - trimmed.trim_start().len());
                let end = found.start() + trimmed.len();
                hits.push((Span::new(start, end), pattern.kind, pattern.confidence));
            }
        }
        hits.sort_by(|a, b| {
            a.0.start
                .cmp(&b.0.start)
                .then_with(|| (b.0.end - b.0.start).cmp(&(a.0.end - a.0.start)))
        });
        let mut kept: Vec<Span> = Vec::new();
        let mut facts = Vec::new();
        for (span, kind, confidence) in hits {
            if kept.iter().any(|other| other.overlaps(&span)) {
                continue;
            }
            kept.push(span);
            facts.push(Fact::new(kind, &text[span.start..span.end], span).with_confidence(confidence));
        }
        facts
    }
}

impl Default for PatternCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(text: &str) -> Vec<(FactKind, String)> {
        PatternCatalog::builtin()
            .detect(text)
            .into_iter()
            .map(|fact| (fact.kind(), fact.surface().to_string()))
            .collect()
    }

    #[test]
    fn detects_dosages_with_units() {
        let found = detect("Give 50mg now, then 2 tablets and 10 units insulin, 2.5 mL syrup.");
        let dosages: Vec<_> = found
            .iter()
            .filter(|(kind, _)| *kind == FactKind::Dosage)
            .map(|(_, text)| text.as_str())
            .collect();
        assert_eq!(dosages, vec!["50mg", "2 tablets", "10 units", "2.5 mL"]);
    }

    #[test]
    fn detects_vitals() {
        let found = detect("BP 120/80 mmHg, temp 98.6°F, pulse 72 bpm, 95% O2, 18 breaths/min.");
        let vitals: Vec<_> = found
            .iter()
            .filter(|(kind, _)| *kind == FactKind::Vital)
            .map(|(_, text)| text.as_str())
            .collect();
        assert_eq!(
            vitals,
            vec!["120/80 mmHg", "98.6°F", "72 bpm", "95% O2", "18 breaths/min"]
        );
    }

    #[test]
    fn detects_routes_and_frequencies() {
        let found = detect("Atenolol PO q.d. and insulin subcutaneously b.i.d. every 6 hours");
        assert!(found.contains(&(FactKind::Route, "PO".into())));
        assert!(found.contains(&(FactKind::Frequency, "q.d.".into())));
        assert!(found.contains(&(FactKind::Route, "subcutaneously".into())));
        assert!(found.contains(&(FactKind::Frequency, "b.i.d.".into())));
        assert!(found.contains(&(FactKind::Frequency, "every 6 hours".into())));
    }

    #[test]
    fn prefers_longest_overlapping_match() {
        let found = detect("Take it once daily.");
        assert_eq!(found, vec![(FactKind::Frequency, "once daily".into())]);
    }

    #[test]
    fn ignores_words_containing_abbreviations() {
        assert!(detect("Bidirectional imports reported").is_empty());
    }

    #[test]
    fn rejects_invalid_extra_patterns() {
        let bad = PatternSpec::new("broken", FactKind::Dosage, "(", 1.0);
        assert!(PatternCatalog::builtin_with(&[bad]).is_err());
    }
}
