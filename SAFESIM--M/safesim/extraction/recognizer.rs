use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::fact::Span;

/// Labelled span produced by a named-entity recognizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecognizedEntity {
    /// Literal text.
    pub text: String,
    /// Recognizer label (`DRUG`, `CHEMICAL`, `DISEASE`, `SYMPTOM`, `PERSON`, ...).
    pub label: String,
    /// Source offsets.
    pub span: Span,
}

/// Context-dependent entity detection (medication names, conditions).
///
/// Implementations must be deterministic for a fixed input and never fail;
/// text they cannot handle yields no entities.
pub trait EntityRecognizer: Send + Sync {
    /// Recognizer name for diagnostics.
    fn name(&self) -> &str;

    /// Labels entities in `text`.
    fn recognize(&self, text: &str) -> Vec<RecognizedEntity>;
}

/// Medications recognized without morphology.
pub const KNOWN_MEDICATIONS: &[&str] = &[
    "acetaminophen",
    "albuterol",
    "allopurinol",
    "amiodarone",
    "amlodipine",
    "amoxicillin",
    "apixaban",
    "aspirin",
    "atenolol",
    "atorvastatin",
    "carvedilol",
    "ceftriaxone",
    "clopidogrel",
    "digoxin",
    "furosemide",
    "gabapentin",
    "heparin",
    "hydrochlorothiazide",
    "ibuprofen",
    "insulin",
    "levothyroxine",
    "lisinopril",
    "losartan",
    "metformin",
    "metoprolol",
    "morphine",
    "nitroglycerin",
    "omeprazole",
    "ondansetron",
    "pantoprazole",
    "prednisone",
    "simvastatin",
    "spironolactone",
    "tramadol",
    "vancomycin",
    "warfarin",
];

/// Diagnoses recognized as whole phrases.
pub const KNOWN_CONDITIONS: &[&str] = &[
    "asthma",
    "atrial fibrillation",
    "bradycardia",
    "chronic kidney disease",
    "congestive heart failure",
    "copd",
    "deep vein thrombosis",
    "diabetes",
    "diabetes mellitus",
    "dysuria",
    "edema",
    "heart failure",
    "hyperlipidemia",
    "hypertension",
    "hypotension",
    "hypothyroidism",
    "myocardial infarction",
    "orthostatic hypotension",
    "pneumonia",
    "pulmonary embolism",
    "sepsis",
    "stroke",
    "syncope",
    "tachycardia",
    "type 2 diabetes",
    "urinary tract infection",
];

/// Symptoms recognized as whole phrases.
pub const KNOWN_SYMPTOMS: &[&str] = &[
    "chest pain",
    "dizziness",
    "dyspnea",
    "fatigue",
    "fever",
    "headache",
    "nausea",
    "palpitations",
    "shortness of breath",
    "vomiting",
];

const DRUG_SUFFIXES: &[&str] = &[
    "olol", "pril", "sartan", "statin", "prazole", "mycin", "cillin", "oxacin", "dipine",
    "formin", "parin", "azepam", "tidine", "triptan", "afil", "gliptin", "glitazone", "semide",
    "thiazide", "xaban", "cycline",
];

const CONDITION_SUFFIXES: &[&str] = &[
    "itis", "emia", "algia", "pathy", "cardia", "pnea", "uria", "megaly", "osis",
];

// Ordinary words that happen to carry a clinical suffix.
const SUFFIX_STOPWORDS: &[&str] = &[
    "diagnosis",
    "prognosis",
    "empathy",
    "sympathy",
    "apathy",
    "telepathy",
    "academia",
];

/// Vocabulary used by [`LexiconRecognizer`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lexicon {
    /// Medication names (any case).
    #[serde(default)]
    pub medications: Vec<String>,
    /// Condition phrases.
    #[serde(default)]
    pub conditions: Vec<String>,
    /// Symptom phrases.
    #[serde(default)]
    pub symptoms: Vec<String>,
}

impl Lexicon {
    /// Built-in vocabulary.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            medications: KNOWN_MEDICATIONS.iter().map(|s| (*s).to_string()).collect(),
            conditions: KNOWN_CONDITIONS.iter().map(|s| (*s).to_string()).collect(),
            symptoms: KNOWN_SYMPTOMS.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Adds the entries of `other`.
    #[must_use]
    pub fn merged(mut self, other: &Self) -> Self {
        self.medications.extend(other.medications.iter().cloned());
        self.conditions.extend(other.conditions.iter().cloned());
        self.symptoms.extend(other.symptoms.iter().cloned());
        self
    }

    /// Lowercased medication names.
    #[must_use]
    pub fn medication_set(&self) -> BTreeSet<String> {
        normalized_set(&self.medications)
    }
}

fn normalized_set(entries: &[String]) -> BTreeSet<String> {
    entries
        .iter()
        .map(|entry| entry.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}

fn phrase_regex(entries: &BTreeSet<String>) -> Result<Option<Regex>, regex::Error> {
    if entries.is_empty() {
        return Ok(None);
    }
    let mut ordered: Vec<&String> = entries.iter().collect();
    ordered.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let body = ordered
        .iter()
        .map(|entry| {
            entry
                .split(' ')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"[\s-]+")
        })
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&format!(r"\b(?:{body})\b"))
        .case_insensitive(true)
        .build()
        .map(Some)
}

static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z][A-Za-z-]{3,}\b").expect("word pattern compiles"));

/// Gazetteer + morphology recognizer for medications and conditions.
///
/// Phrases from the lexicon win over suffix guesses; suffix guesses label
/// drug-class stems as `CHEMICAL` and clinical suffixes as `DISEASE`.
#[derive(Debug, Clone)]
pub struct LexiconRecognizer {
    medications: Option<Regex>,
    conditions: Option<Regex>,
    symptoms: Option<Regex>,
    known: BTreeSet<String>,
}

static BUILTIN: Lazy<LexiconRecognizer> = Lazy::new(|| {
    LexiconRecognizer::new(&Lexicon::builtin()).expect("built-in lexicon compiles")
});

impl LexiconRecognizer {
    /// Compiles a recognizer for `lexicon`.
    pub fn new(lexicon: &Lexicon) -> Result<Self, regex::Error> {
        let known = lexicon.medication_set();
        let conditions = normalized_set(&lexicon.conditions);
        let symptoms = normalized_set(&lexicon.symptoms);
        Ok(Self {
            medications: phrase_regex(&known)?,
            conditions: phrase_regex(&conditions)?,
            symptoms: phrase_regex(&symptoms)?,
            known,
        })
    }

    /// Recognizer over the built-in lexicon.
    #[must_use]
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Lowercased medication names this recognizer knows.
    #[must_use]
    pub const fn known_medications(&self) -> &BTreeSet<String> {
        &self.known
    }

    fn morphology_label(word: &str) -> Option<&'static str> {
        let lower = word.to_lowercase();
        if SUFFIX_STOPWORDS.contains(&lower.as_str()) {
            return None;
        }
        let stem_ok = |suffix: &str| lower.len() > suffix.len() + 2;
        if DRUG_SUFFIXES
            .iter()
            .any(|suffix| lower.ends_with(suffix) && stem_ok(suffix))
        {
            return Some("CHEMICAL");
        }
        if CONDITION_SUFFIXES
            .iter()
            .any(|suffix| lower.ends_with(suffix) && stem_ok(suffix))
        {
            return Some("DISEASE");
        }
        None
    }
}

impl Default for LexiconRecognizer {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EntityRecognizer for LexiconRecognizer {
    fn name(&self) -> &str {
        "lexicon"
    }

    fn recognize(&self, text: &str) -> Vec<RecognizedEntity> {
        let mut entities: Vec<RecognizedEntity> = Vec::new();
        let phrase_sets = [
            (&self.medications, "DRUG"),
            (&self.conditions, "DISEASE"),
            (&self.symptoms, "SYMPTOM"),
        ];
        for (regex, label) in phrase_sets {
            let Some(regex) = regex else { continue };
            for found in regex.find_iter(text) {
                let span = Span::new(found.start(), found.end());
                if entities.iter().any(|entity| entity.span.overlaps(&span)) {
                    continue;
                }
                entities.push(RecognizedEntity {
                    text: found.as_str().to_string(),
                    label: label.into(),
                    span,
                });
            }
        }
        for found in WORD.find_iter(text) {
            let span = Span::new(found.start(), found.end());
            if entities.iter().any(|entity| entity.span.overlaps(&span)) {
                continue;
            }
            if let Some(label) = Self::morphology_label(found.as_str()) {
                entities.push(RecognizedEntity {
                    text: found.as_str().to_string(),
                    label: label.into(),
                    span,
                });
            }
        }
        entities.sort_by_key(|entity| entity.span.start);
        entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(text: &str) -> Vec<(String, String)> {
        LexiconRecognizer::builtin()
            .recognize(text)
            .into_iter()
            .map(|entity| (entity.text, entity.label))
            .collect()
    }

    #[test]
    fn recognizes_lexicon_entries() {
        let found = labels("Patient prescribed 50mg Atenolol PO q.d. for hypertension.");
        assert_eq!(
            found,
            vec![
                ("Atenolol".into(), "DRUG".into()),
                ("hypertension".into(), "DISEASE".into()),
            ]
        );
    }

    #[test]
    fn prefers_longest_phrase() {
        let found = labels("History of congestive heart failure and shortness of breath.");
        assert_eq!(
            found,
            vec![
                ("congestive heart failure".into(), "DISEASE".into()),
                ("shortness of breath".into(), "SYMPTOM".into()),
            ]
        );
    }

    #[test]
    fn falls_back_to_morphology() {
        let found = labels("Started bisoprolol for pericarditis; diagnosis pending.");
        assert_eq!(
            found,
            vec![
                ("bisoprolol".into(), "CHEMICAL".into()),
                ("pericarditis".into(), "DISEASE".into()),
            ]
        );
    }

    #[test]
    fn custom_lexicon_extends_builtin() {
        let extra = Lexicon {
            medications: vec!["Zyloprim".into()],
            ..Lexicon::default()
        };
        let recognizer = LexiconRecognizer::new(&Lexicon::builtin().merged(&extra)).unwrap();
        assert!(recognizer.known_medications().contains("zyloprim"));
        let found = recognizer.recognize("Continue zyloprim daily");
        assert_eq!(found[0].label, "DRUG");
    }
}
