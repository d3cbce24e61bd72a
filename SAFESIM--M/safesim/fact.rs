use std::{
    fmt,
    hash::{Hash, Hasher},
    ops::Range,
};

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Category of a must-preserve fact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactKind {
    /// Quantity with a unit, e.g. `50mg`.
    Dosage,
    /// Drug name, e.g. `Atenolol`.
    Medication,
    /// Vital-sign reading, e.g. `120/80 mmHg`.
    Vital,
    /// Administration schedule, e.g. `q.d.`.
    Frequency,
    /// Administration route, e.g. `PO`.
    Route,
    /// Diagnosis or symptom, e.g. `hypertension`.
    Condition,
}

impl FactKind {
    /// All kinds in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Dosage,
        Self::Medication,
        Self::Vital,
        Self::Frequency,
        Self::Route,
        Self::Condition,
    ];

    /// Mutability implied by the kind.
    #[must_use]
    pub const fn mutability(self) -> Mutability {
        match self {
            Self::Dosage | Self::Medication | Self::Vital => Mutability::Immutable,
            Self::Frequency | Self::Route | Self::Condition => Mutability::Transformable,
        }
    }

    /// Upper-case label used in diagnostics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Dosage => "DOSAGE",
            Self::Medication => "MEDICATION",
            Self::Vital => "VITAL",
            Self::Frequency => "FREQUENCY",
            Self::Route => "ROUTE",
            Self::Condition => "CONDITION",
        }
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How strictly a fact must survive simplification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mutability {
    /// Must appear verbatim or via a normalized/spacing-tolerant match.
    Immutable,
    /// May appear as an approved paraphrase.
    Transformable,
}

/// Byte range of a fact in the source text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
}

impl Span {
    /// Creates a span.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Whether two spans share at least one byte.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

/// Lowercases, trims and collapses internal whitespace.
#[must_use]
pub fn normalize_fact_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A unit of information that must survive simplification.
///
/// Identity is `(text, kind)`; `span`, `surface` and `confidence` are
/// diagnostics and do not take part in equality. Mutability is always derived
/// from the kind, including when a fact is deserialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "FactRecord")]
pub struct Fact {
    text: String,
    surface: String,
    kind: FactKind,
    mutability: Mutability,
    span: Span,
    confidence: f32,
}

impl Fact {
    /// Creates a fact from the literal text found in the source.
    #[must_use]
    pub fn new(kind: FactKind, surface: impl Into<String>, span: Span) -> Self {
        let surface = surface.into().trim().to_string();
        Self {
            text: normalize_fact_text(&surface),
            surface,
            kind,
            mutability: kind.mutability(),
            span,
            confidence: 1.0,
        }
    }

    /// Sets the detector confidence, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Normalized text used for matching.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Literal text as it appeared in the source.
    #[must_use]
    pub fn surface(&self) -> &str {
        &self.surface
    }

    /// Fact category.
    #[must_use]
    pub const fn kind(&self) -> FactKind {
        self.kind
    }

    /// Mutability derived from the kind.
    #[must_use]
    pub const fn mutability(&self) -> Mutability {
        self.mutability
    }

    /// Whether the fact must appear verbatim or normalized.
    #[must_use]
    pub fn is_immutable(&self) -> bool {
        self.mutability == Mutability::Immutable
    }

    /// Source offsets.
    #[must_use]
    pub const fn span(&self) -> Span {
        self.span
    }

    /// Detector confidence.
    #[must_use]
    pub const fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Deduplication key.
    #[must_use]
    pub fn key(&self) -> FactKey {
        FactKey {
            text: self.text.clone(),
            kind: self.kind,
        }
    }
}

impl PartialEq for Fact {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.text == other.text
    }
}

impl Eq for Fact {}

impl Hash for Fact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.surface, self.kind)
    }
}

#[derive(Deserialize)]
struct FactRecord {
    surface: String,
    kind: FactKind,
    #[serde(default)]
    span: Span,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

const fn default_confidence() -> f32 {
    1.0
}

impl From<FactRecord> for Fact {
    fn from(record: FactRecord) -> Self {
        Self::new(record.kind, record.surface, record.span).with_confidence(record.confidence)
    }
}

/// Identity of a fact: normalized text plus kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactKey {
    /// Normalized text.
    pub text: String,
    /// Category.
    pub kind: FactKind,
}

/// Deduplicated facts in first-seen order.
///
/// Logically a set; the order only exists so diagnostics are reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactSet {
    facts: IndexMap<FactKey, Fact>,
}

impl FactSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fact; returns `false` when an equal fact was already present.
    pub fn insert(&mut self, fact: Fact) -> bool {
        let key = fact.key();
        if self.facts.contains_key(&key) {
            return false;
        }
        self.facts.insert(key, fact);
        true
    }

    /// Number of facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Iterates in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values()
    }

    /// Facts of one kind.
    pub fn of_kind(&self, kind: FactKind) -> impl Iterator<Item = &Fact> {
        self.iter().filter(move |fact| fact.kind() == kind)
    }

    /// Facts that must appear verbatim or normalized.
    pub fn immutable(&self) -> impl Iterator<Item = &Fact> {
        self.iter().filter(|fact| fact.is_immutable())
    }

    /// Copies the facts into a vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Fact> {
        self.iter().cloned().collect()
    }
}

impl FromIterator<Fact> for FactSet {
    fn from_iter<I: IntoIterator<Item = Fact>>(iter: I) -> Self {
        let mut set = Self::new();
        for fact in iter {
            set.insert(fact);
        }
        set
    }
}

impl Extend<Fact> for FactSet {
    fn extend<I: IntoIterator<Item = Fact>>(&mut self, iter: I) {
        for fact in iter {
            self.insert(fact);
        }
    }
}

impl IntoIterator for FactSet {
    type Item = Fact;
    type IntoIter = indexmap::map::IntoValues<FactKey, Fact>;

    fn into_iter(self) -> Self::IntoIter {
        self.facts.into_values()
    }
}

impl<'a> IntoIterator for &'a FactSet {
    type Item = &'a Fact;
    type IntoIter = indexmap::map::Values<'a, FactKey, Fact>;

    fn into_iter(self) -> Self::IntoIter {
        self.facts.values()
    }
}

impl Serialize for FactSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.facts.values())
    }
}

impl<'de> Deserialize<'de> for FactSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Fact>::deserialize(deserializer).map(|facts| facts.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutability_follows_kind() {
        for kind in FactKind::ALL {
            let fact = Fact::new(kind, "x", Span::default());
            assert_eq!(fact.mutability(), kind.mutability());
        }
        assert!(Fact::new(FactKind::Vital, "98.6 F", Span::default()).is_immutable());
        assert!(!Fact::new(FactKind::Route, "PO", Span::default()).is_immutable());
    }

    #[test]
    fn text_is_normalized_but_surface_kept() {
        let fact = Fact::new(FactKind::Medication, "  Insulin   Glargine ", Span::new(3, 20));
        assert_eq!(fact.text(), "insulin glargine");
        assert_eq!(fact.surface(), "Insulin   Glargine");
    }

    #[test]
    fn set_deduplicates_by_text_and_kind() {
        let mut set = FactSet::new();
        assert!(set.insert(Fact::new(FactKind::Medication, "Atenolol", Span::new(0, 8))));
        assert!(!set.insert(Fact::new(FactKind::Medication, "atenolol", Span::new(30, 38))));
        assert!(set.insert(Fact::new(FactKind::Condition, "atenolol", Span::new(30, 38))));
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().next().unwrap().span(), Span::new(0, 8));
    }

    #[test]
    fn deserialization_rederives_mutability() {
        let raw = r#"{"surface":"50mg","kind":"DOSAGE","mutability":"TRANSFORMABLE"}"#;
        let fact: Fact = serde_json::from_str(raw).unwrap();
        assert!(fact.is_immutable());
        let set: FactSet = serde_json::from_str(&format!("[{raw},{raw}]")).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn spans_overlap() {
        assert!(Span::new(0, 5).overlaps(&Span::new(4, 9)));
        assert!(!Span::new(0, 5).overlaps(&Span::new(5, 9)));
    }
}
