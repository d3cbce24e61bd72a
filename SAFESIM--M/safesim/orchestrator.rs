use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use safesim_logging::LogLevel;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    batch::CancellationToken,
    config::SafeSimConfig,
    extraction::EntityExtractor,
    fact::FactSet,
    relevance::{KeywordRelevanceGate, RelevanceAssessment, RelevanceGate, RelevanceStatus},
    simplification::{AdapterError, SimplificationAdapter, SimplificationRequest},
    telemetry::PipelineTelemetry,
    verification::{Strictness, VerificationResult, Verifier},
};

/// Loop settings for one pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Strictness used by [`SafeSimPipeline::run`].
    pub strictness: Strictness,
    /// Regenerations allowed after the first attempt.
    pub max_retries: usize,
    /// Upper bound on one generation call.
    pub generation_timeout: Duration,
    /// Whether UNCLEAR texts are rejected like UNRELATED ones.
    pub reject_unclear: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            strictness: Strictness::High,
            max_retries: 2,
            generation_timeout: Duration::from_secs(30),
            reject_unclear: true,
        }
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Run identifier shared by the run's log records and events.
    pub run_id: Uuid,
    /// Input text.
    pub original_text: String,
    /// Final candidate; empty when the input was rejected.
    pub simplified_text: String,
    /// One verdict per generation attempt, in order.
    pub attempts: Vec<VerificationResult>,
    /// Whether the final candidate passed verification.
    pub is_safe: bool,
    /// Generation attempts made.
    pub attempts_used: usize,
    /// Relevance gate verdict, when a gate ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<RelevanceAssessment>,
    /// Facts the candidates were checked against.
    pub facts: FactSet,
    /// Backend that produced the candidates.
    pub backend: String,
    /// Strictness tier applied.
    pub strictness: Strictness,
    /// Relevance notes followed by the final verdict's warnings.
    pub warnings: Vec<String>,
    /// One-paragraph diagnostic.
    pub explanation: String,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

impl PipelineResult {
    /// Verdict of the last attempt.
    #[must_use]
    pub fn final_verification(&self) -> Option<&VerificationResult> {
        self.attempts.last()
    }

    /// Score of the last attempt, `0.0` when nothing was generated.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.final_verification().map_or(0.0, VerificationResult::score)
    }

    /// Whether the relevance gate stopped the run before extraction.
    #[must_use]
    pub fn was_rejected(&self) -> bool {
        self.attempts.is_empty()
            && self
                .relevance
                .as_ref()
                .is_some_and(|assessment| !assessment.is_relevant)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Position in the extract / generate / verify loop.
enum LoopState {
    Extracted,
    Generated {
        attempt: usize,
        outcome: Result<String, AdapterError>,
    },
    Verified {
        attempt: usize,
        candidate: String,
        verdict: VerificationResult,
    },
    Done,
}

/// What the loop hands back to the result builder.
struct LoopOutcome {
    final_text: String,
    history: Vec<VerificationResult>,
    cancelled: bool,
}

/// Extraction, generation and verification with feedback-guided retries.
///
/// Holds only read-only state, so one instance can serve concurrent runs.
#[derive(Clone)]
pub struct SafeSimPipeline {
    extractor: Arc<EntityExtractor>,
    verifier: Arc<Verifier>,
    gate: Option<Arc<dyn RelevanceGate>>,
    options: PipelineOptions,
    telemetry: Option<PipelineTelemetry>,
}

impl fmt::Debug for SafeSimPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeSimPipeline")
            .field("extractor", &self.extractor)
            .field("gate", &self.gate.is_some())
            .field("options", &self.options)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl Default for SafeSimPipeline {
    fn default() -> Self {
        Self::new(Arc::new(EntityExtractor::builtin()), Arc::new(Verifier::default()))
    }
}

impl SafeSimPipeline {
    /// Creates a pipeline with default options and the keyword relevance gate.
    #[must_use]
    pub fn new(extractor: Arc<EntityExtractor>, verifier: Arc<Verifier>) -> Self {
        let options = PipelineOptions::default();
        Self {
            extractor,
            verifier,
            gate: Some(Arc::new(KeywordRelevanceGate::new(options.reject_unclear))),
            options,
            telemetry: None,
        }
    }

    /// Builds the pipeline described by `config`.
    pub fn from_config(config: &SafeSimConfig) -> Result<Self> {
        let options = config.pipeline_options();
        let pipeline = Self::new(Arc::new(config.extractor()?), Arc::new(config.verifier()))
            .with_options(options);
        Ok(if config.pipeline.relevance_gate {
            pipeline.with_gate(Arc::new(KeywordRelevanceGate::new(options.reject_unclear)))
        } else {
            pipeline.without_gate()
        })
    }

    /// Replaces the relevance gate.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn RelevanceGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Runs without a relevance gate.
    #[must_use]
    pub fn without_gate(mut self) -> Self {
        self.gate = None;
        self
    }

    /// Replaces the loop options.
    #[must_use]
    pub const fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Loop options.
    #[must_use]
    pub const fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Shared extractor.
    #[must_use]
    pub fn extractor(&self) -> &EntityExtractor {
        &self.extractor
    }

    /// Shared verifier.
    #[must_use]
    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Runs with the configured strictness and retry bound.
    pub async fn run(&self, text: &str, backend: &dyn SimplificationAdapter) -> PipelineResult {
        self.process_with_retries(text, backend, self.options.strictness, self.options.max_retries)
            .await
    }

    /// Runs with the configured retry bound.
    pub async fn process(
        &self,
        text: &str,
        backend: &dyn SimplificationAdapter,
        strictness: Strictness,
    ) -> PipelineResult {
        self.process_with_retries(text, backend, strictness, self.options.max_retries)
            .await
    }

    /// Runs the loop, making at most `max_retries + 1` generation attempts.
    ///
    /// Never fails: rejected input, backend errors and unmet facts all end in
    /// a result with `is_safe == false` and an explanation.
    pub async fn process_with_retries(
        &self,
        text: &str,
        backend: &dyn SimplificationAdapter,
        strictness: Strictness,
        max_retries: usize,
    ) -> PipelineResult {
        self.execute(text, backend, strictness, max_retries, None).await
    }

    /// Like [`Self::process`], but issues no generation call after `cancel` fires.
    ///
    /// A call already in flight completes and is verified. A run halted before
    /// it passed keeps its verdicts so far and ends unsafe with a cancellation
    /// explanation.
    pub async fn process_cancellable(
        &self,
        text: &str,
        backend: &dyn SimplificationAdapter,
        strictness: Strictness,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        self.execute(text, backend, strictness, self.options.max_retries, Some(cancel))
            .await
    }

    async fn execute(
        &self,
        text: &str,
        backend: &dyn SimplificationAdapter,
        strictness: Strictness,
        max_retries: usize,
        cancel: Option<&CancellationToken>,
    ) -> PipelineResult {
        let run_id = Uuid::new_v4();
        let relevance = self.gate.as_ref().map(|gate| self.assess(gate.as_ref(), text));
        if let Some(assessment) = relevance.as_ref().filter(|a| !a.is_relevant) {
            info!(%run_id, status = %assessment.status, "input rejected by relevance gate");
            self.record(
                LogLevel::Warn,
                "pipeline.rejected",
                json!({ "run_id": run_id, "status": assessment.status }),
            );
            self.emit(
                "safesim.run.rejected",
                json!({ "run_id": run_id, "status": assessment.status, "confidence": assessment.confidence }),
            )
            .await;
            return rejected(run_id, text, backend.name(), strictness, assessment.clone());
        }

        let facts = self.extractor.extract(text);
        debug!(%run_id, facts = facts.len(), backend = backend.name(), "facts extracted");
        let outcome = self
            .retry_loop(run_id, text, &facts, backend, strictness, max_retries, cancel)
            .await;
        let cancelled = outcome.cancelled;

        let result = completed(run_id, text, outcome, relevance, facts, backend.name(), strictness);
        info!(%run_id, attempts = result.attempts_used, safe = result.is_safe, cancelled, "pipeline finished");
        self.record(
            if result.is_safe { LogLevel::Info } else { LogLevel::Warn },
            "pipeline.completed",
            json!({
                "run_id": run_id,
                "backend": result.backend,
                "attempts": result.attempts_used,
                "is_safe": result.is_safe,
                "score": result.score(),
                "cancelled": cancelled,
            }),
        );
        self.emit(
            "safesim.run.completed",
            json!({
                "run_id": run_id,
                "is_safe": result.is_safe,
                "attempts": result.attempts_used,
                "cancelled": cancelled,
            }),
        )
        .await;
        result
    }

    /// Drives the state machine; returns the last candidate and every verdict.
    ///
    /// `cancel` is checked before every generation call.
    #[allow(clippy::too_many_arguments)]
    async fn retry_loop(
        &self,
        run_id: Uuid,
        text: &str,
        facts: &FactSet,
        backend: &dyn SimplificationAdapter,
        strictness: Strictness,
        max_retries: usize,
        cancel: Option<&CancellationToken>,
    ) -> LoopOutcome {
        let halted = || cancel.is_some_and(CancellationToken::is_cancelled);
        let must_include: Vec<String> = facts
            .immutable()
            .map(|fact| fact.surface().to_string())
            .collect();
        let mut history: Vec<VerificationResult> = Vec::new();
        let mut final_text = String::new();
        let mut cancelled = false;
        let mut state = LoopState::Extracted;
        loop {
            state = match state {
                LoopState::Extracted if halted() => {
                    info!(%run_id, "cancelled before the first generation call");
                    cancelled = true;
                    LoopState::Done
                }
                LoopState::Extracted => {
                    let request = SimplificationRequest::new(text, must_include.clone());
                    LoopState::Generated {
                        attempt: 1,
                        outcome: self.generate(backend, &request).await,
                    }
                }
                LoopState::Generated { attempt, outcome } => match outcome {
                    Ok(candidate) => {
                        let verdict = self.verifier.verify(facts, &candidate, strictness);
                        LoopState::Verified {
                            attempt,
                            candidate,
                            verdict,
                        }
                    }
                    Err(err) => {
                        warn!(%run_id, attempt, transient = err.is_transient(), error = %err, "generation failed");
                        LoopState::Verified {
                            attempt,
                            candidate: String::new(),
                            verdict: VerificationResult::generation_failed(
                                facts,
                                strictness,
                                err.to_string(),
                            ),
                        }
                    }
                },
                LoopState::Verified {
                    attempt,
                    candidate,
                    verdict,
                } => {
                    debug!(%run_id, attempt, status = %verdict.status(), score = verdict.score(), "attempt verified");
                    self.emit(
                        "safesim.attempt.verified",
                        json!({
                            "run_id": run_id,
                            "attempt": attempt,
                            "status": verdict.status(),
                            "score": verdict.score(),
                            "missing": verdict.missing_labels(),
                        }),
                    )
                    .await;
                    let finished = verdict.is_safe() || attempt > max_retries;
                    let hints = correction_hints(&verdict);
                    history.push(verdict);
                    final_text = candidate;
                    if finished {
                        LoopState::Done
                    } else if halted() {
                        info!(%run_id, attempt, "cancelled; no further generation calls");
                        cancelled = true;
                        LoopState::Done
                    } else {
                        let request = SimplificationRequest::new(text, must_include.clone())
                            .with_corrections(hints)
                            .with_attempt(attempt + 1);
                        LoopState::Generated {
                            attempt: attempt + 1,
                            outcome: self.generate(backend, &request).await,
                        }
                    }
                }
                LoopState::Done => break,
            };
        }
        LoopOutcome {
            final_text,
            history,
            cancelled,
        }
    }

    fn assess(&self, gate: &dyn RelevanceGate, text: &str) -> RelevanceAssessment {
        let mut assessment = gate.classify(text);
        assessment.is_relevant = match assessment.status {
            RelevanceStatus::Medical | RelevanceStatus::LikelyMedical => true,
            RelevanceStatus::Unclear => !self.options.reject_unclear,
            RelevanceStatus::Unrelated => false,
        };
        assessment
    }

    async fn generate(
        &self,
        backend: &dyn SimplificationAdapter,
        request: &SimplificationRequest,
    ) -> Result<String, AdapterError> {
        let limit = self.options.generation_timeout;
        let call = AssertUnwindSafe(backend.simplify(request)).catch_unwind();
        match tokio::time::timeout(limit, call).await {
            Err(_) => Err(AdapterError::Timeout(limit)),
            Ok(Err(payload)) => Err(AdapterError::Panicked(panic_message(&*payload))),
            Ok(Ok(outcome)) => outcome,
        }
    }

    fn record(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.log(level, message, metadata) {
                warn!(error = %err, message, "telemetry log write failed");
            }
        }
    }

    async fn emit(&self, event_type: &str, payload: Value) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.event(event_type, payload).await {
                warn!(error = %err, event_type, "telemetry event publish failed");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

/// `include: <fact>` directive per missing fact, in extraction order.
fn correction_hints(verdict: &VerificationResult) -> Vec<String> {
    verdict
        .missing()
        .iter()
        .map(|fact| format!("include: {}", fact.surface()))
        .collect()
}

fn rejected(
    run_id: Uuid,
    text: &str,
    backend: &str,
    strictness: Strictness,
    relevance: RelevanceAssessment,
) -> PipelineResult {
    PipelineResult {
        run_id,
        original_text: text.to_string(),
        simplified_text: String::new(),
        attempts: Vec::new(),
        is_safe: false,
        attempts_used: 0,
        warnings: vec![
            format!("input rejected ({}): {}", relevance.status, relevance.explanation),
            "text was not simplified; only medical text is supported".into(),
        ],
        explanation: format!(
            "Not processed: {} Provide discharge summaries, clinical notes or medication instructions.",
            relevance.explanation
        ),
        relevance: Some(relevance),
        facts: FactSet::new(),
        backend: backend.to_string(),
        strictness,
        completed_at: Utc::now(),
    }
}

fn completed(
    run_id: Uuid,
    text: &str,
    outcome: LoopOutcome,
    relevance: Option<RelevanceAssessment>,
    facts: FactSet,
    backend: &str,
    strictness: Strictness,
) -> PipelineResult {
    let mut warnings = Vec::new();
    if let Some(assessment) = relevance
        .as_ref()
        .filter(|a| a.status != RelevanceStatus::Medical)
    {
        warnings.push(format!("relevance note: {}", assessment.explanation));
    }
    let LoopOutcome {
        final_text: simplified_text,
        history: attempts,
        cancelled,
    } = outcome;
    if cancelled {
        warnings.push("run cancelled before the retry budget was used".into());
    }
    let is_safe = attempts.last().is_some_and(VerificationResult::is_safe);
    let explanation = match attempts.last() {
        Some(last) => {
            warnings.extend(last.warnings().iter().cloned());
            if is_safe {
                format!("Verified on attempt {}. {}", attempts.len(), last.explain())
            } else if cancelled {
                format!(
                    "Cancelled after {} attempt(s); the last candidate is for review only. {}",
                    attempts.len(),
                    last.explain()
                )
            } else {
                format!(
                    "No safe simplification after {} attempt(s); the last candidate is for review only. {}",
                    attempts.len(),
                    last.explain()
                )
            }
        }
        None if cancelled => "Cancelled before any generation attempt was made.".into(),
        None => "No generation attempt was made.".into(),
    };
    PipelineResult {
        run_id,
        original_text: text.to_string(),
        simplified_text,
        attempts_used: attempts.len(),
        attempts,
        is_safe,
        relevance,
        facts,
        backend: backend.to_string(),
        strictness,
        warnings,
        explanation,
        completed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        extraction::{EntityRecognizer, LexiconRecognizer, RecognizedEntity},
        fact::FactKind,
        simplification::{
            adapter::testing::{ScriptedSimplifier, Step},
            RuleBasedSimplifier,
        },
        verification::VerificationStatus,
    };
    use safesim_events::MemoryEventBus;

    const SOURCE: &str = "Patient prescribed 50mg Atenolol PO q.d. for hypertension.";
    const FAITHFUL: &str = "Take 50mg of Atenolol by mouth once a day for high blood pressure.";
    const NO_DOSAGE: &str = "Take Atenolol by mouth once a day for high blood pressure.";
    const NO_MEDICATION: &str = "Take 50mg by mouth once a day for high blood pressure.";

    fn pipeline() -> SafeSimPipeline {
        SafeSimPipeline::default()
    }

    #[tokio::test]
    async fn faithful_first_attempt_is_safe() {
        let backend = ScriptedSimplifier::replies(&[FAITHFUL]);
        let result = pipeline().process(SOURCE, &backend, Strictness::High).await;
        assert!(result.is_safe);
        assert_eq!(result.attempts_used, 1);
        assert_eq!(result.simplified_text, FAITHFUL);
        let verdict = result.final_verification().unwrap();
        assert_eq!(verdict.status(), VerificationStatus::Safe);
        assert!((verdict.score() - 1.0).abs() < 1e-9);
        assert_eq!(backend.request(0).must_include, vec!["50mg", "Atenolol"]);
        assert!(backend.request(0).correction_hints.is_none());
    }

    #[tokio::test]
    async fn missing_dosage_triggers_corrected_retry() {
        let backend = ScriptedSimplifier::replies(&[NO_DOSAGE, FAITHFUL]);
        let result = pipeline().process(SOURCE, &backend, Strictness::Low).await;
        assert!(result.is_safe);
        assert_eq!(result.attempts_used, 2);
        assert_eq!(result.attempts[0].status(), VerificationStatus::Unsafe);
        let retry = backend.request(1);
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.hints(), ["include: 50mg"]);
    }

    #[tokio::test]
    async fn off_topic_input_skips_extraction_and_generation() {
        struct CountingRecognizer(Arc<AtomicUsize>);

        impl EntityRecognizer for CountingRecognizer {
            fn name(&self) -> &str {
                "counting"
            }

            fn recognize(&self, text: &str) -> Vec<RecognizedEntity> {
                self.0.fetch_add(1, Ordering::SeqCst);
                LexiconRecognizer::builtin().recognize(text)
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let extractor = EntityExtractor::builtin()
            .with_recognizer(Arc::new(CountingRecognizer(Arc::clone(&calls))));
        let pipeline = SafeSimPipeline::new(Arc::new(extractor), Arc::new(Verifier::default()));
        let backend = ScriptedSimplifier::replies(&[FAITHFUL]);
        let result = pipeline
            .process(
                "Preheat the oven to 350°F. Mix flour, sugar and salt, then bake for 30 minutes.",
                &backend,
                Strictness::High,
            )
            .await;
        assert_eq!(result.simplified_text, "");
        assert!(!result.is_safe);
        assert!(result.was_rejected());
        assert_eq!(result.attempts_used, 0);
        assert_eq!(result.relevance.as_ref().unwrap().status, RelevanceStatus::Unrelated);
        assert_eq!(backend.calls(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.facts.is_empty());
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let backend = ScriptedSimplifier::replies(&[NO_MEDICATION, NO_MEDICATION, NO_MEDICATION, FAITHFUL]);
        let result = pipeline().process(SOURCE, &backend, Strictness::High).await;
        assert!(!result.is_safe);
        assert_eq!(result.attempts_used, 3);
        assert_eq!(backend.calls(), 3);
        assert_eq!(result.simplified_text, NO_MEDICATION);
        let last = result.final_verification().unwrap();
        assert!(last
            .missing()
            .iter()
            .any(|fact| fact.kind() == FactKind::Medication && fact.text() == "atenolol"));
        assert!(result.explanation.starts_with("No safe simplification after 3 attempt(s)"));
    }

    #[tokio::test]
    async fn explicit_retry_bound_is_honoured() {
        let backend = ScriptedSimplifier::replies(&[NO_MEDICATION; 6]);
        let result = pipeline()
            .process_with_retries(SOURCE, &backend, Strictness::High, 4)
            .await;
        assert_eq!(result.attempts_used, 5);
        let none = ScriptedSimplifier::replies(&[NO_MEDICATION; 2]);
        let single = pipeline()
            .process_with_retries(SOURCE, &none, Strictness::High, 0)
            .await;
        assert_eq!(single.attempts_used, 1);
    }

    #[tokio::test]
    async fn cancelled_run_issues_no_generation_call() {
        let token = CancellationToken::new();
        token.cancel();
        let backend = ScriptedSimplifier::replies(&[FAITHFUL]);
        let result = pipeline()
            .process_cancellable(SOURCE, &backend, Strictness::High, &token)
            .await;
        assert_eq!(backend.calls(), 0);
        assert_eq!(result.attempts_used, 0);
        assert!(!result.is_safe);
        assert!(!result.was_rejected());
        assert!(!result.facts.is_empty());
        assert!(result.explanation.starts_with("Cancelled before any generation attempt"));
    }

    #[tokio::test]
    async fn cancellation_mid_run_stops_retries() {
        struct CancelAfterReply {
            token: CancellationToken,
            inner: ScriptedSimplifier,
        }

        #[async_trait::async_trait]
        impl SimplificationAdapter for CancelAfterReply {
            fn name(&self) -> &str {
                "cancel-after-reply"
            }

            async fn simplify(&self, request: &SimplificationRequest) -> Result<String, AdapterError> {
                self.token.cancel();
                self.inner.simplify(request).await
            }
        }

        let token = CancellationToken::new();
        let inner = ScriptedSimplifier::replies(&[NO_DOSAGE, FAITHFUL, FAITHFUL]);
        let backend = CancelAfterReply {
            token: token.clone(),
            inner: inner.clone(),
        };
        let result = pipeline()
            .process_cancellable(SOURCE, &backend, Strictness::High, &token)
            .await;
        assert_eq!(inner.calls(), 1);
        assert_eq!(result.attempts_used, 1);
        assert!(!result.is_safe);
        assert_eq!(result.simplified_text, NO_DOSAGE);
        assert!(result.explanation.starts_with("Cancelled after 1 attempt(s)"));
        assert!(result.warnings.iter().any(|w| w.contains("cancelled")));
    }

    #[tokio::test]
    async fn uncancelled_token_runs_full_loop() {
        let backend = ScriptedSimplifier::replies(&[NO_DOSAGE, FAITHFUL]);
        let result = pipeline()
            .process_cancellable(SOURCE, &backend, Strictness::High, &CancellationToken::new())
            .await;
        assert!(result.is_safe);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn backend_errors_become_unsafe_attempts() {
        let backend = ScriptedSimplifier::new(vec![
            Step::Fail(AdapterError::RateLimited("slow down".into())),
            Step::Reply(FAITHFUL.into()),
        ]);
        let result = pipeline().process(SOURCE, &backend, Strictness::High).await;
        assert!(result.is_safe);
        let first = &result.attempts[0];
        assert!(first.generation_error().unwrap().contains("rate limited"));
        assert!(first.score().abs() < f64::EPSILON);
        assert_eq!(first.missing().len(), result.facts.len());
        assert_eq!(backend.request(1).hints().len(), result.facts.len());
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let options = PipelineOptions {
            generation_timeout: Duration::from_millis(20),
            max_retries: 1,
            ..PipelineOptions::default()
        };
        let backend = ScriptedSimplifier::new(vec![
            Step::Sleep(Duration::from_secs(5), FAITHFUL.into()),
            Step::Sleep(Duration::from_secs(5), FAITHFUL.into()),
        ]);
        let result = pipeline()
            .with_options(options)
            .process(SOURCE, &backend, Strictness::High)
            .await;
        assert!(!result.is_safe);
        assert_eq!(result.attempts_used, 2);
        assert_eq!(result.simplified_text, "");
        assert!(result.attempts[1].generation_error().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn panicking_backend_is_contained() {
        let backend = ScriptedSimplifier::new(vec![Step::Panic, Step::Reply(FAITHFUL.into())]);
        let result = pipeline().process(SOURCE, &backend, Strictness::High).await;
        assert!(result.is_safe);
        assert_eq!(result.attempts_used, 2);
        assert!(result.attempts[0].generation_error().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn text_without_facts_passes_trivially() {
        let backend = ScriptedSimplifier::replies(&["Rest and drink water."]);
        let result = pipeline()
            .without_gate()
            .process("", &backend, Strictness::High)
            .await;
        assert!(result.is_safe);
        assert!(result.facts.is_empty());
        assert!(result.relevance.is_none());
    }

    #[tokio::test]
    async fn unclear_input_follows_reject_setting() {
        let text = "My heart feels heavy today.";
        let strict = pipeline()
            .process(text, &ScriptedSimplifier::replies(&["ok"]), Strictness::High)
            .await;
        assert!(strict.was_rejected());

        let lenient = pipeline()
            .with_options(PipelineOptions {
                reject_unclear: false,
                ..PipelineOptions::default()
            })
            .process(text, &ScriptedSimplifier::replies(&["My heart feels heavy."]), Strictness::High)
            .await;
        assert!(!lenient.was_rejected());
        assert!(lenient.warnings[0].starts_with("relevance note:"));
    }

    #[tokio::test]
    async fn rule_based_backend_round_trip() {
        let result = pipeline()
            .process(SOURCE, &RuleBasedSimplifier::new(), Strictness::High)
            .await;
        assert!(result.is_safe, "{}", result.explanation);
        assert_eq!(result.backend, "rule-based");
        assert!(result.simplified_text.contains("high blood pressure"));
    }

    #[tokio::test]
    async fn emits_attempt_and_run_events() {
        let bus = Arc::new(MemoryEventBus::new(32));
        let telemetry = PipelineTelemetry::builder("safesim.pipeline")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let backend = ScriptedSimplifier::replies(&[NO_DOSAGE, FAITHFUL]);
        let result = pipeline()
            .with_telemetry(telemetry)
            .process(SOURCE, &backend, Strictness::High)
            .await;
        let attempts = bus.events_in("safesim.attempt");
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].payload["missing"], json!(["50mg"]));
        let completed = bus.events_in("safesim.run.completed");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].payload["run_id"], json!(result.run_id));
    }

    #[tokio::test]
    async fn failing_event_sink_does_not_break_run() {
        struct BrokenSink;

        #[async_trait::async_trait]
        impl safesim_events::EventPublisher for BrokenSink {
            async fn publish(&self, _event: safesim_events::EventRecord) -> anyhow::Result<()> {
                anyhow::bail!("event disk full")
            }
        }

        let telemetry = PipelineTelemetry::builder("safesim.pipeline")
            .event_publisher(Arc::new(BrokenSink))
            .build()
            .unwrap();
        let backend = ScriptedSimplifier::replies(&[NO_DOSAGE, FAITHFUL]);
        let result = pipeline()
            .with_telemetry(telemetry)
            .process(SOURCE, &backend, Strictness::High)
            .await;
        assert!(result.is_safe);
        assert_eq!(result.attempts_used, 2);
    }

    #[tokio::test]
    async fn result_serializes_to_json() {
        let backend = ScriptedSimplifier::replies(&[FAITHFUL]);
        let result = pipeline().process(SOURCE, &backend, Strictness::Medium).await;
        let value: Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(value["is_safe"], json!(true));
        assert_eq!(value["strictness"], json!("medium"));
        assert_eq!(value["attempts"][0]["status"], json!("SAFE"));
        assert_eq!(value["relevance"]["status"], json!("medical"));
    }
}
