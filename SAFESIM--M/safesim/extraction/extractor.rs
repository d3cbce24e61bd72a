use std::{collections::BTreeSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    extraction::{
        patterns::{PatternCatalog, PatternSpec},
        recognizer::{EntityRecognizer, Lexicon, LexiconRecognizer, RecognizedEntity},
    },
    fact::{Fact, FactKind, FactSet, Span},
};

const DRUG_CONFIDENCE: f32 = 0.85;
const OTHER_CONFIDENCE: f32 = 0.8;
const MIN_UNKNOWN_MEDICATION_LEN: usize = 5;

/// `[extraction]` configuration: vocabulary and pattern additions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractionSettings {
    /// Extra medication names.
    #[serde(default)]
    pub medications: Vec<String>,
    /// Extra condition phrases.
    #[serde(default)]
    pub conditions: Vec<String>,
    /// Extra symptom phrases.
    #[serde(default)]
    pub symptoms: Vec<String>,
    /// Extra detection patterns, evaluated after the built-in ones.
    #[serde(default)]
    pub patterns: Vec<PatternSpec>,
}

/// Maps recognizer labels onto fact kinds; unlisted labels are ignored.
#[must_use]
pub fn kind_for_label(label: &str) -> Option<FactKind> {
    match label.to_ascii_uppercase().as_str() {
        "DRUG" | "CHEMICAL" => Some(FactKind::Medication),
        "DISEASE" | "SYMPTOM" => Some(FactKind::Condition),
        _ => None,
    }
}

/// Converts text into a deduplicated set of must-preserve facts.
///
/// Pattern detections and recognizer detections are unioned. A recognizer
/// span overlapping a pattern span is dropped, and an unknown medication
/// name shorter than five characters is treated as noise.
#[derive(Clone)]
pub struct EntityExtractor {
    patterns: PatternCatalog,
    recognizer: Arc<dyn EntityRecognizer>,
    known_medications: BTreeSet<String>,
}

impl fmt::Debug for EntityExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityExtractor")
            .field("patterns", &self.patterns.len())
            .field("recognizer", &self.recognizer.name())
            .field("known_medications", &self.known_medications.len())
            .finish()
    }
}

impl EntityExtractor {
    /// Creates an extractor from explicit parts.
    #[must_use]
    pub fn new(
        patterns: PatternCatalog,
        recognizer: Arc<dyn EntityRecognizer>,
        known_medications: BTreeSet<String>,
    ) -> Self {
        Self {
            patterns,
            recognizer,
            known_medications,
        }
    }

    /// Extractor with the built-in patterns and lexicon.
    #[must_use]
    pub fn builtin() -> Self {
        let recognizer = LexiconRecognizer::builtin();
        let known = recognizer.known_medications().clone();
        Self::new(PatternCatalog::builtin(), Arc::new(recognizer), known)
    }

    /// Built-in extractor extended with configured vocabulary and patterns.
    pub fn from_settings(settings: &ExtractionSettings) -> Result<Self, regex::Error> {
        let extra = Lexicon {
            medications: settings.medications.clone(),
            conditions: settings.conditions.clone(),
            symptoms: settings.symptoms.clone(),
        };
        let lexicon = Lexicon::builtin().merged(&extra);
        let recognizer = LexiconRecognizer::new(&lexicon)?;
        let known = recognizer.known_medications().clone();
        let patterns = PatternCatalog::builtin_with(&settings.patterns)?;
        Ok(Self::new(patterns, Arc::new(recognizer), known))
    }

    /// Replaces the recognizer, keeping patterns and the known-medication list.
    #[must_use]
    pub fn with_recognizer(mut self, recognizer: Arc<dyn EntityRecognizer>) -> Self {
        self.recognizer = recognizer;
        self
    }

    /// Extracts facts ordered by source offset.
    #[must_use]
    pub fn extract(&self, text: &str) -> FactSet {
        if text.trim().is_empty() {
            return FactSet::new();
        }
        let mut facts = self.patterns.detect(text);
        let pattern_spans: Vec<Span> = facts.iter().map(Fact::span).collect();
        for entity in self.recognizer.recognize(text) {
            if pattern_spans.iter().any(|span| span.overlaps(&entity.span)) {
                continue;
            }
            if let Some(fact) = self.entity_fact(&entity) {
                facts.push(fact);
            }
        }
        facts.sort_by_key(|fact| (fact.span().start, fact.span().end));
        let set: FactSet = facts.into_iter().collect();
        debug!(facts = set.len(), recognizer = self.recognizer.name(), "extracted facts");
        set
    }

    fn entity_fact(&self, entity: &RecognizedEntity) -> Option<Fact> {
        let kind = kind_for_label(&entity.label)?;
        let surface = entity.text.trim();
        if surface.is_empty() {
            return None;
        }
        if kind == FactKind::Medication {
            let known = self.known_medications.contains(&surface.to_lowercase());
            if !known && surface.chars().count() < MIN_UNKNOWN_MEDICATION_LEN {
                return None;
            }
        }
        let confidence = if entity.label.eq_ignore_ascii_case("DRUG") {
            DRUG_CONFIDENCE
        } else {
            OTHER_CONFIDENCE
        };
        Some(Fact::new(kind, surface, entity.span).with_confidence(confidence))
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Wraps each fact occurrence in `text` as `[surface|KIND]`.
///
/// Spans that fall outside `text`, split a character, or overlap an earlier
/// marker are skipped.
#[must_use]
pub fn highlight(text: &str, facts: &FactSet) -> String {
    let mut spans: Vec<(Span, FactKind)> = facts
        .iter()
        .map(|fact| (fact.span(), fact.kind()))
        .filter(|(span, _)| {
            span.start < span.end
                && span.end <= text.len()
                && text.is_char_boundary(span.start)
                && text.is_char_boundary(span.end)
        })
        .collect();
    spans.sort_by_key(|(span, _)| span.start);
    let mut out = String::with_capacity(text.len() + spans.len() * 12);
    let mut cursor = 0;
    for (span, kind) in spans {
        if span.start < cursor {
            continue;
        }
        out.push_str(&text[cursor..span.start]);
        out.push('[');
        out.push_str(&text[span.start..span.end]);
        out.push('|');
        out.push_str(kind.label());
        out.push(']');
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DISCHARGE: &str = "Patient prescribed 50mg Atenolol PO q.d. for hypertension.";

    fn kinds(set: &FactSet) -> Vec<(FactKind, String)> {
        set.iter()
            .map(|fact| (fact.kind(), fact.text().to_string()))
            .collect()
    }

    #[test]
    fn extracts_discharge_note() {
        let facts = EntityExtractor::builtin().extract(DISCHARGE);
        assert_eq!(
            kinds(&facts),
            vec![
                (FactKind::Dosage, "50mg".into()),
                (FactKind::Medication, "atenolol".into()),
                (FactKind::Route, "po".into()),
                (FactKind::Frequency, "q.d.".into()),
                (FactKind::Condition, "hypertension".into()),
            ]
        );
        let atenolol = facts.of_kind(FactKind::Medication).next().unwrap();
        assert_eq!(atenolol.surface(), "Atenolol");
        assert!(atenolol.is_immutable());
    }

    #[test]
    fn empty_and_blank_input_yield_no_facts() {
        let extractor = EntityExtractor::builtin();
        assert!(extractor.extract("").is_empty());
        assert!(extractor.extract("   \n\t").is_empty());
        assert!(extractor.extract("The weather was pleasant.").is_empty());
    }

    #[test]
    fn repeated_mentions_are_deduplicated() {
        let facts = EntityExtractor::builtin()
            .extract("Take Metformin 500mg. Continue metformin 500 mg with meals.");
        let meds: Vec<_> = facts.of_kind(FactKind::Medication).collect();
        assert_eq!(meds.len(), 1);
        let dosages: Vec<_> = facts.of_kind(FactKind::Dosage).map(Fact::text).collect();
        assert_eq!(dosages, vec!["500mg", "500 mg"]);
    }

    struct FixedRecognizer(Vec<RecognizedEntity>);

    impl EntityRecognizer for FixedRecognizer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn recognize(&self, _text: &str) -> Vec<RecognizedEntity> {
            self.0.clone()
        }
    }

    fn entity(text: &str, label: &str, start: usize) -> RecognizedEntity {
        RecognizedEntity {
            text: text.into(),
            label: label.into(),
            span: Span::new(start, start + text.len()),
        }
    }

    #[test]
    fn filters_recognizer_output() {
        let text = "Give 50mg Zoc and Tylenolx; seen by Smith for flu";
        let recognizer = FixedRecognizer(vec![
            entity("50mg", "CHEMICAL", 5),
            entity("Zoc", "DRUG", 10),
            entity("Tylenolx", "DRUG", 18),
            entity("Smith", "PERSON", 36),
            entity("flu", "DISEASE", 46),
        ]);
        let extractor = EntityExtractor::builtin().with_recognizer(Arc::new(recognizer));
        let facts = extractor.extract(text);
        assert_eq!(
            kinds(&facts),
            vec![
                (FactKind::Dosage, "50mg".into()),
                (FactKind::Medication, "tylenolx".into()),
                (FactKind::Condition, "flu".into()),
            ]
        );
    }

    #[test]
    fn configured_vocabulary_is_recognized() {
        let settings = ExtractionSettings {
            medications: vec!["Ozempic".into()],
            conditions: vec!["gout".into()],
            ..ExtractionSettings::default()
        };
        let extractor = EntityExtractor::from_settings(&settings).unwrap();
        let facts = extractor.extract("Start Ozempic weekly; history of gout.");
        assert!(facts
            .iter()
            .any(|fact| fact.kind() == FactKind::Medication && fact.text() == "ozempic"));
        assert!(facts
            .iter()
            .any(|fact| fact.kind() == FactKind::Condition && fact.text() == "gout"));
    }

    #[test]
    fn highlights_spans() {
        let extractor = EntityExtractor::builtin();
        let facts = extractor.extract(DISCHARGE);
        assert_eq!(
            highlight(DISCHARGE, &facts),
            "Patient prescribed [50mg|DOSAGE] [Atenolol|MEDICATION] [PO|ROUTE] \
             [q.d.|FREQUENCY] for [hypertension|CONDITION]."
        );
    }

    proptest! {
        #[test]
        fn extraction_is_idempotent(text in "[A-Za-z0-9 ./%°-]{0,80}") {
            let extractor = EntityExtractor::builtin();
            let first = extractor.extract(&text);
            let second = extractor.extract(&text);
            prop_assert_eq!(first.to_vec(), second.to_vec());
        }

        #[test]
        fn facts_respect_kind_mutability(text in "(50mg|Atenolol|PO|q.d.|edema|120/80 mmHg|and| ){0,12}") {
            for fact in EntityExtractor::builtin().extract(&text).iter() {
                prop_assert_eq!(fact.mutability(), fact.kind().mutability());
            }
        }
    }
}
