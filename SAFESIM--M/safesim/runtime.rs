use std::{collections::HashMap, env, fmt, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use safesim_events::FileEventPublisher;
use tracing::warn;

use crate::{
    batch::{BatchReport, BatchRunner, CancellationToken},
    config::{SafeSimConfig, TelemetrySettings},
    orchestrator::{PipelineResult, SafeSimPipeline},
    simplification::{
        build_backend_with, AdapterError, BackendSelector, SimplificationAdapter,
        SimplificationRequest,
    },
    telemetry::PipelineTelemetry,
    verification::Strictness,
};

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Stand-in for a backend that could not be constructed; every call fails with the reason.
struct UnavailableBackend {
    name: String,
    reason: String,
}

#[async_trait]
impl SimplificationAdapter for UnavailableBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn simplify(&self, _request: &SimplificationRequest) -> Result<String, AdapterError> {
        Err(AdapterError::Configuration(self.reason.clone()))
    }
}

/// Configuration-driven entry point: `process(text, backend, strictness)`.
///
/// Backends are built on first use and cached per selector.
pub struct SafeSimRuntime {
    config: Arc<SafeSimConfig>,
    pipeline: Arc<SafeSimPipeline>,
    telemetry: Option<PipelineTelemetry>,
    backends: Mutex<HashMap<BackendSelector, Arc<dyn SimplificationAdapter>>>,
    env: EnvLookup,
}

impl fmt::Debug for SafeSimRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeSimRuntime")
            .field("pipeline", &self.pipeline)
            .field("cached_backends", &self.backends.lock().len())
            .finish_non_exhaustive()
    }
}

impl SafeSimRuntime {
    /// Builds the runtime, opening any log or event files the config names.
    pub fn from_config(config: SafeSimConfig) -> Result<Self> {
        let telemetry = telemetry_from(&config.telemetry)?;
        let mut pipeline = SafeSimPipeline::from_config(&config)?;
        if let Some(telemetry) = &telemetry {
            pipeline = pipeline.with_telemetry(telemetry.clone());
        }
        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            telemetry,
            backends: Mutex::new(HashMap::new()),
            env: Arc::new(|name| env::var(name).ok()),
        })
    }

    /// Replaces the telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.pipeline = Arc::new(self.pipeline.as_ref().clone().with_telemetry(telemetry.clone()));
        self.telemetry = Some(telemetry);
        self
    }

    /// Reads credentials through `lookup` instead of the process environment.
    #[must_use]
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self.backends.lock().clear();
        self
    }

    /// Registers `adapter` for `selector`, bypassing construction from config.
    #[must_use]
    pub fn with_backend(self, selector: BackendSelector, adapter: Arc<dyn SimplificationAdapter>) -> Self {
        self.backends.lock().insert(selector, adapter);
        self
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &SafeSimConfig {
        &self.config
    }

    /// Shared pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &SafeSimPipeline {
        &self.pipeline
    }

    /// Cached or freshly built backend for `selector`.
    pub fn backend(&self, selector: BackendSelector) -> Result<Arc<dyn SimplificationAdapter>, AdapterError> {
        if let Some(adapter) = self.backends.lock().get(&selector) {
            return Ok(Arc::clone(adapter));
        }
        let adapter = build_backend_with(selector, &self.config.backend, |name| (*self.env)(name))?;
        Ok(Arc::clone(
            self.backends.lock().entry(selector).or_insert(adapter),
        ))
    }

    fn backend_or_unavailable(&self, selector: BackendSelector) -> Arc<dyn SimplificationAdapter> {
        self.backend(selector).unwrap_or_else(|err| {
            warn!(backend = %selector, error = %err, "backend unavailable");
            Arc::new(UnavailableBackend {
                name: selector.to_string(),
                reason: err.to_string(),
            })
        })
    }

    /// Simplifies `text` with the selected backend and strictness.
    ///
    /// A backend that cannot be built yields an unsafe result whose attempts
    /// carry the construction error.
    pub async fn process(&self, text: &str, selector: BackendSelector, strictness: Strictness) -> PipelineResult {
        let backend = self.backend_or_unavailable(selector);
        self.pipeline.process(text, backend.as_ref(), strictness).await
    }

    /// Simplifies `text` with the configured backend and strictness.
    pub async fn process_default(&self, text: &str) -> PipelineResult {
        self.process(text, self.config.backend.kind, self.config.pipeline.strictness)
            .await
    }

    /// Runs a batch on the configured worker pool.
    pub async fn batch(
        &self,
        texts: Vec<String>,
        selector: BackendSelector,
        strictness: Strictness,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let mut runner = BatchRunner::new(
            Arc::clone(&self.pipeline),
            self.config.pipeline.batch_concurrency,
        );
        if let Some(telemetry) = &self.telemetry {
            runner = runner.with_telemetry(telemetry.clone());
        }
        runner
            .run(texts, self.backend_or_unavailable(selector), strictness, cancel)
            .await
    }
}

fn telemetry_from(settings: &TelemetrySettings) -> Result<Option<PipelineTelemetry>> {
    if settings.log_path.is_none() && settings.event_path.is_none() {
        return Ok(None);
    }
    let mut builder = PipelineTelemetry::builder("safesim");
    if let Some(path) = &settings.log_path {
        builder = builder.log_path(path);
    }
    if let Some(level) = settings.min_level {
        builder = builder.min_level(level);
    }
    if let Some(path) = &settings.event_path {
        builder = builder.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    builder.build().map(Some)
}
