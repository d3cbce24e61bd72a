use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use safesim_logging::LogLevel;
use serde::{Deserialize, Serialize};

use crate::{
    extraction::{EntityExtractor, ExtractionSettings},
    orchestrator::PipelineOptions,
    policy::{TransformPolicy, TransformRule},
    simplification::BackendConfig,
    verification::{Strictness, ThresholdTable, Verifier},
};

/// Upper bound on `max_retries`; larger values are a configuration mistake.
pub const MAX_RETRIES_LIMIT: usize = 10;

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Strictness used when the caller does not pass one.
    #[serde(default)]
    pub strictness: Strictness,
    /// Regenerations allowed after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Upper bound on one generation call, in milliseconds.
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    /// Whether the relevance gate runs before extraction.
    #[serde(default = "default_true")]
    pub relevance_gate: bool,
    /// Whether UNCLEAR texts are rejected like UNRELATED ones.
    #[serde(default = "default_true")]
    pub reject_unclear: bool,
    /// Pipelines run concurrently by the batch runner.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            strictness: Strictness::default(),
            max_retries: default_max_retries(),
            generation_timeout_ms: default_generation_timeout_ms(),
            relevance_gate: true,
            reject_unclear: true,
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

/// `[telemetry]` section. Relative paths resolve against the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelemetrySettings {
    /// JSON-lines log file.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// JSON-lines event file.
    #[serde(default)]
    pub event_path: Option<PathBuf>,
    /// Minimum level written to the log file.
    #[serde(default)]
    pub min_level: Option<LogLevel>,
}

/// Process-wide configuration, loaded once and shared read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SafeSimConfig {
    /// Loop settings.
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Verifier thresholds per tier.
    #[serde(default)]
    pub thresholds: ThresholdTable,
    /// Generation backend settings.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Paraphrases added to the built-in policy.
    #[serde(default)]
    pub transforms: Vec<TransformRule>,
    /// Extractor vocabulary and pattern additions.
    #[serde(default)]
    pub extraction: ExtractionSettings,
    /// Log and event sinks.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl SafeSimConfig {
    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading safesim config {}", path.display()))?;
        let mut config =
            Self::from_toml_str(&raw).with_context(|| format!("loading {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for slot in [&mut config.telemetry.log_path, &mut config.telemetry.event_path] {
            if let Some(target) = slot.as_mut() {
                if target.is_relative() {
                    *target = base.join(&*target);
                }
            }
        }
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("parsing safesim config")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_retries > MAX_RETRIES_LIMIT {
            bail!(
                "pipeline.max_retries {} exceeds the limit of {MAX_RETRIES_LIMIT}",
                self.pipeline.max_retries
            );
        }
        if self.pipeline.generation_timeout_ms == 0 {
            bail!("pipeline.generation_timeout_ms must be positive");
        }
        if self.pipeline.batch_concurrency == 0 {
            bail!("pipeline.batch_concurrency must be positive");
        }
        if let Err(reason) = self.thresholds.validate() {
            bail!("invalid thresholds: {reason}");
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            bail!("backend.temperature {} outside [0, 2]", self.backend.temperature);
        }
        for rule in &self.transforms {
            if rule.source.trim().is_empty() {
                bail!("transform rule with empty source");
            }
            if rule.renderings.iter().all(|r| r.trim().is_empty()) {
                bail!("transform rule '{}' has no renderings", rule.source);
            }
        }
        Ok(())
    }

    /// Built-in paraphrase table plus `[[transforms]]`.
    #[must_use]
    pub fn policy(&self) -> TransformPolicy {
        TransformPolicy::builtin_with(self.transforms.iter().cloned())
    }

    /// Extractor with the configured vocabulary and patterns.
    pub fn extractor(&self) -> Result<EntityExtractor> {
        EntityExtractor::from_settings(&self.extraction).context("compiling extraction patterns")
    }

    /// Verifier over [`Self::policy`] and the configured thresholds.
    #[must_use]
    pub fn verifier(&self) -> Verifier {
        Verifier::new(self.policy().into(), self.thresholds)
    }

    /// Loop options derived from `[pipeline]`.
    #[must_use]
    pub const fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            strictness: self.pipeline.strictness,
            max_retries: self.pipeline.max_retries,
            generation_timeout: Duration::from_millis(self.pipeline.generation_timeout_ms),
            reject_unclear: self.pipeline.reject_unclear,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_max_retries() -> usize {
    2
}

const fn default_generation_timeout_ms() -> u64 {
    30_000
}

const fn default_batch_concurrency() -> usize {
    4
}
