#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! SafeSim: plain-language rewriting of clinical text, verified fact by fact.
//!
//! Facts that must survive (dosages, medications, vitals, frequencies,
//! routes, conditions) are extracted from the source, a backend produces a
//! candidate, and the verifier checks every fact against it. Unsafe
//! candidates are regenerated with correction hints a bounded number of times.

/// Typed facts and fact sets.
#[path = "../fact.rs"]
pub mod fact;

/// Pattern and lexicon based fact extraction.
#[path = "../extraction/main.rs"]
pub mod extraction;

/// Approved paraphrase table.
#[path = "../policy.rs"]
pub mod policy;

/// Fact-by-fact verification of candidates.
#[path = "../verification/main.rs"]
pub mod verification;

/// Generation backends.
#[path = "../simplification/main.rs"]
pub mod simplification;

/// Medical relevance gate.
#[path = "../relevance.rs"]
pub mod relevance;

/// TOML configuration.
#[path = "../config.rs"]
pub mod config;

/// Log and event sinks.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Retry loop state machine.
#[path = "../orchestrator.rs"]
pub mod orchestrator;

/// Bounded concurrent batches.
#[path = "../batch.rs"]
pub mod batch;

/// Configuration-driven entry point.
#[path = "../runtime.rs"]
pub mod runtime;

pub use batch::{BatchEntry, BatchOutcome, BatchReport, BatchRunner, BatchStatistics, CancellationToken};
pub use config::{PipelineSettings, SafeSimConfig, TelemetrySettings};
pub use extraction::{EntityExtractor, EntityRecognizer, ExtractionSettings};
pub use fact::{Fact, FactKind, FactSet, Mutability, Span};
pub use orchestrator::{PipelineOptions, PipelineResult, SafeSimPipeline};
pub use policy::{TransformPolicy, TransformRule};
pub use relevance::{KeywordRelevanceGate, RelevanceAssessment, RelevanceGate, RelevanceStatus};
pub use runtime::SafeSimRuntime;
pub use simplification::{
    AdapterError, BackendConfig, BackendSelector, RuleBasedSimplifier, SimplificationAdapter,
    SimplificationRequest,
};
pub use telemetry::{PipelineTelemetry, PipelineTelemetryBuilder};
pub use verification::{Strictness, ThresholdTable, VerificationResult, VerificationStatus, Verifier};
