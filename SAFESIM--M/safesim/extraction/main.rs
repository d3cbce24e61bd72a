/// Fact extraction pipeline (patterns + recognizer union).
pub mod extractor;
/// Pattern catalog for structurally regular facts.
pub mod patterns;
/// Named-entity recognizer seam and the lexicon recognizer.
pub mod recognizer;

pub use extractor::{highlight, kind_for_label, EntityExtractor, ExtractionSettings};
pub use patterns::{PatternCatalog, PatternSpec};
pub use recognizer::{EntityRecognizer, Lexicon, LexiconRecognizer, RecognizedEntity};
