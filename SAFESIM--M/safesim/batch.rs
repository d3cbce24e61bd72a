use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{info, warn};

use crate::{
    orchestrator::{PipelineResult, SafeSimPipeline},
    simplification::SimplificationAdapter,
    telemetry::PipelineTelemetry,
    verification::Strictness,
};

/// Cooperative cancellation flag shared between a batch and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; texts not yet dispatched are skipped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What happened to one input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Pipeline ran to completion (safe, unsafe or rejected).
    Completed(Box<PipelineResult>),
    /// Not dispatched because the batch was cancelled.
    Skipped,
    /// Pipeline task died unexpectedly.
    Failed {
        /// Panic message.
        reason: String,
    },
}

/// One input slot of a batch, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Position in the input.
    pub index: usize,
    /// Outcome for the text at `index`.
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

impl BatchEntry {
    /// Pipeline result, if the text was processed.
    #[must_use]
    pub fn result(&self) -> Option<&PipelineResult> {
        match &self.outcome {
            BatchOutcome::Completed(result) => Some(result),
            BatchOutcome::Skipped | BatchOutcome::Failed { .. } => None,
        }
    }
}

/// Aggregate counters over a batch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchStatistics {
    /// Input texts.
    pub total: usize,
    /// Texts the pipeline ran on, rejected ones included.
    pub processed: usize,
    /// Results that passed verification.
    pub safe: usize,
    /// Results that reached generation but never passed verification.
    #[serde(rename = "unsafe")]
    pub unsafe_count: usize,
    /// Results stopped by the relevance gate.
    pub rejected: usize,
    /// Texts never dispatched, or whose task failed.
    pub skipped: usize,
    /// `safe / processed`.
    pub safety_rate: f64,
    /// Mean final score over generated results.
    pub average_score: f64,
    /// Mean attempts over generated results.
    pub average_attempts: f64,
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: usize) -> f64 {
    value as f64
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / as_f64(count)
    }
}

impl BatchStatistics {
    /// Computes the counters for `entries`.
    #[must_use]
    pub fn from_entries(entries: &[BatchEntry]) -> Self {
        let mut stats = Self {
            total: entries.len(),
            ..Self::default()
        };
        let mut score_sum = 0.0;
        let mut attempt_sum = 0.0;
        for entry in entries {
            let Some(result) = entry.result() else {
                stats.skipped += 1;
                continue;
            };
            stats.processed += 1;
            if result.was_rejected() {
                stats.rejected += 1;
                continue;
            }
            if result.is_safe {
                stats.safe += 1;
            } else {
                stats.unsafe_count += 1;
            }
            score_sum += result.score();
            attempt_sum += as_f64(result.attempts_used);
        }
        let generated = stats.safe + stats.unsafe_count;
        stats.safety_rate = mean(as_f64(stats.safe), stats.processed);
        stats.average_score = mean(score_sum, generated);
        stats.average_attempts = mean(attempt_sum, generated);
        stats
    }
}

/// Results of a batch run, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// One entry per input text.
    pub entries: Vec<BatchEntry>,
    /// Whether the batch was cancelled before every text was dispatched.
    pub cancelled: bool,
    /// Aggregate counters.
    pub statistics: BatchStatistics,
}

impl BatchReport {
    /// Completed pipeline results, in input order.
    pub fn results(&self) -> impl Iterator<Item = &PipelineResult> {
        self.entries.iter().filter_map(BatchEntry::result)
    }
}

/// Runs pipelines for many texts on a bounded worker pool.
///
/// Workers share the pipeline's read-only extractor, verifier and policy.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    pipeline: Arc<SafeSimPipeline>,
    concurrency: usize,
    telemetry: Option<PipelineTelemetry>,
}

impl BatchRunner {
    /// Creates a runner executing at most `concurrency` pipelines at once.
    #[must_use]
    pub fn new(pipeline: Arc<SafeSimPipeline>, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
            telemetry: None,
        }
    }

    /// Attaches telemetry for batch progress events.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Worker limit.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Processes `texts` with `backend`.
    ///
    /// Once `cancel` fires no further text is dispatched and running pipelines
    /// issue no further generation calls. A call already in flight finishes
    /// (or times out) and its verdict is kept.
    pub async fn run(
        &self,
        texts: Vec<String>,
        backend: Arc<dyn SimplificationAdapter>,
        strictness: Strictness,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let total = texts.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<BatchOutcome>> = vec![None; total];
        let mut cancelled = false;

        for (index, text) in texts.into_iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let pipeline = Arc::clone(&self.pipeline);
            let backend = Arc::clone(&backend);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(pipeline.process_cancellable(
                    &text,
                    backend.as_ref(),
                    strictness,
                    &cancel,
                ))
                .catch_unwind()
                .await;
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(result))) => {
                    self.emit(
                        "safesim.batch.item",
                        json!({ "index": index, "is_safe": result.is_safe, "attempts": result.attempts_used }),
                    )
                    .await;
                    slots[index] = Some(BatchOutcome::Completed(Box::new(result)));
                }
                Ok((index, Err(_))) => {
                    warn!(index, "batch pipeline panicked");
                    slots[index] = Some(BatchOutcome::Failed {
                        reason: "pipeline panicked".into(),
                    });
                }
                Err(err) => warn!(error = %err, "batch task failed to join"),
            }
        }

        let entries: Vec<BatchEntry> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| BatchEntry {
                index,
                outcome: slot.unwrap_or(BatchOutcome::Skipped),
            })
            .collect();
        let statistics = BatchStatistics::from_entries(&entries);
        info!(
            total,
            safe = statistics.safe,
            rejected = statistics.rejected,
            skipped = statistics.skipped,
            cancelled,
            "batch finished"
        );
        self.emit(
            "safesim.batch.completed",
            json!({ "statistics": statistics, "cancelled": cancelled }),
        )
        .await;
        BatchReport {
            entries,
            cancelled,
            statistics,
        }
    }

    async fn emit(&self, event_type: &str, payload: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.event(event_type, payload).await {
                warn!(error = %err, event_type, "telemetry event publish failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use safesim_events::MemoryEventBus;

    use super::*;
    use crate::simplification::{
        adapter::testing::ScriptedSimplifier, AdapterError, RuleBasedSimplifier,
        SimplificationRequest,
    };

    const SOURCE: &str = "Patient prescribed 50mg Atenolol PO q.d. for hypertension.";
    const RECIPE: &str = "Mix 2 cups of flour with 1 cup of sugar. Bake at 350°F for 30 minutes.";

    fn runner(concurrency: usize) -> BatchRunner {
        BatchRunner::new(Arc::new(SafeSimPipeline::default()), concurrency)
    }

    #[tokio::test]
    async fn keeps_input_order() {
        let texts: Vec<String> = [
            SOURCE,
            "Give 5mg amlodipine PO daily for hypertension.",
            RECIPE,
            "Patient was prescribed Lasix 40mg b.i.d. for edema.",
        ]
        .iter()
        .map(|text| (*text).to_string())
        .collect();
        let report = runner(3)
            .run(
                texts.clone(),
                Arc::new(RuleBasedSimplifier::new()),
                Strictness::High,
                &CancellationToken::new(),
            )
            .await;
        assert!(!report.cancelled);
        assert_eq!(report.entries.len(), 4);
        for (entry, text) in report.entries.iter().zip(&texts) {
            assert_eq!(entry.result().unwrap().original_text, *text);
        }
        assert_eq!(report.statistics.rejected, 1);
        assert_eq!(report.statistics.safe, 3);
    }

    #[tokio::test]
    async fn computes_statistics() {
        let backend = ScriptedSimplifier::replies(&[
            "Take 50mg of Atenolol by mouth once a day for high blood pressure.",
            "Take Atenolol daily.",
            "Take Atenolol daily.",
            "Take Atenolol daily.",
        ]);
        let report = runner(1)
            .run(
                vec![SOURCE.into(), SOURCE.into(), RECIPE.into()],
                Arc::new(backend),
                Strictness::High,
                &CancellationToken::new(),
            )
            .await;
        let stats = report.statistics;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.safe, 1);
        assert_eq!(stats.unsafe_count, 1);
        assert_eq!(stats.rejected, 1);
        assert!((stats.safety_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((stats.average_attempts - 2.0).abs() < 1e-9);
        assert!(stats.average_score > 0.0 && stats.average_score < 1.0);
    }

    #[tokio::test]
    async fn cancelled_before_start_skips_everything() {
        let token = CancellationToken::new();
        token.cancel();
        let report = runner(2)
            .run(
                vec![SOURCE.into(), SOURCE.into()],
                Arc::new(RuleBasedSimplifier::new()),
                Strictness::High,
                &token,
            )
            .await;
        assert!(report.cancelled);
        assert_eq!(report.statistics.skipped, 2);
        assert!(report
            .entries
            .iter()
            .all(|entry| matches!(entry.outcome, BatchOutcome::Skipped)));
    }

    struct CancellingSimplifier {
        token: CancellationToken,
    }

    #[async_trait]
    impl SimplificationAdapter for CancellingSimplifier {
        fn name(&self) -> &str {
            "cancelling"
        }

        async fn simplify(&self, request: &SimplificationRequest) -> Result<String, AdapterError> {
            self.token.cancel();
            RuleBasedSimplifier::new().simplify(request).await
        }
    }

    #[tokio::test]
    async fn cancellation_stops_further_dispatch() {
        let token = CancellationToken::new();
        let backend = Arc::new(CancellingSimplifier {
            token: token.clone(),
        });
        let report = runner(1)
            .run(vec![SOURCE.into(); 4], backend, Strictness::High, &token)
            .await;
        assert!(report.cancelled);
        assert!(report.entries[0].result().unwrap().is_safe);
        assert_eq!(report.statistics.processed, 1);
        assert_eq!(report.statistics.skipped, 3);
    }

    struct CancelOnFirstCall {
        token: CancellationToken,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SimplificationAdapter for CancelOnFirstCall {
        fn name(&self) -> &str {
            "cancel-on-first-call"
        }

        async fn simplify(&self, _request: &SimplificationRequest) -> Result<String, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.token.cancel();
            Ok("Take Atenolol by mouth once a day for high blood pressure.".into())
        }
    }

    #[tokio::test]
    async fn cancellation_halts_retries_of_running_items() {
        let token = CancellationToken::new();
        let backend = Arc::new(CancelOnFirstCall {
            token: token.clone(),
            calls: AtomicUsize::new(0),
        });
        let report = runner(1)
            .run(vec![SOURCE.into(); 3], backend.clone(), Strictness::High, &token)
            .await;
        assert!(report.cancelled);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        let first = report.entries[0].result().unwrap();
        assert!(!first.is_safe);
        assert_eq!(first.attempts_used, 1);
        assert!(first.explanation.contains("Cancelled"));
        assert_eq!(report.statistics.processed, 1);
        assert_eq!(report.statistics.unsafe_count, 1);
        assert_eq!(report.statistics.skipped, 2);
    }

    #[tokio::test]
    async fn publishes_progress_events() {
        let bus = Arc::new(MemoryEventBus::new(32));
        let telemetry = PipelineTelemetry::builder("safesim.batch")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        runner(2)
            .with_telemetry(telemetry)
            .run(
                vec![SOURCE.into(), RECIPE.into()],
                Arc::new(RuleBasedSimplifier::new()),
                Strictness::Medium,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(bus.events_in("safesim.batch.item").len(), 2);
        let done = bus.events_in("safesim.batch.completed");
        assert_eq!(done[0].payload["statistics"]["total"], json!(2));
    }
}
