use std::{env, fmt, str::FromStr, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::simplification::{
    adapter::{AdapterError, SimplificationAdapter},
    remote::{
        AnthropicSimplifier, HttpGenerateSimplifier, OpenAiSimplifier, RemoteSettings,
        ANTHROPIC_ENDPOINT, ANTHROPIC_MODEL, LOCAL_ENDPOINT, OPENAI_ENDPOINT, OPENAI_MODEL,
    },
    rulebased::RuleBasedSimplifier,
};

/// Names a generation backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum BackendSelector {
    /// Deterministic jargon replacement, no network.
    #[default]
    #[serde(rename = "rule-based", alias = "dummy", alias = "rule_based")]
    RuleBased,
    /// OpenAI-compatible chat completions.
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic messages API.
    #[serde(rename = "anthropic", alias = "claude")]
    Anthropic,
    /// Local model server with a `/generate` endpoint.
    #[serde(rename = "local", alias = "http")]
    Local,
}

impl BackendSelector {
    /// All selectors.
    pub const ALL: [Self; 4] = [Self::RuleBased, Self::OpenAi, Self::Anthropic, Self::Local];

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RuleBased => "rule-based",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Local => "local",
        }
    }

    /// Environment variable holding the credential by default.
    #[must_use]
    pub const fn default_key_env(self) -> Option<&'static str> {
        match self {
            Self::RuleBased => None,
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Local => Some("LANGMODEL_API_KEY"),
        }
    }
}

impl fmt::Display for BackendSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized backend name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown backend '{0}' (expected rule-based, openai, anthropic or local)")]
pub struct ParseBackendError(pub String);

impl FromStr for BackendSelector {
    type Err = ParseBackendError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dummy" | "rule-based" | "rule_based" | "rules" => Ok(Self::RuleBased),
            "openai" | "gpt" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "local" | "http" => Ok(Self::Local),
            other => Err(ParseBackendError(other.to_string())),
        }
    }
}

/// Per-service overrides (`[backend.openai]`, `[backend.anthropic]`, `[backend.local]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Request URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Model identifier.
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

const fn default_temperature() -> f32 {
    0.3
}

const fn default_max_tokens() -> u32 {
    500
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}

/// `[backend]` configuration. Credentials are only named here, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Backend used when the caller does not pick one.
    #[serde(default)]
    pub kind: BackendSelector,
    /// Sampling temperature for hosted and local models.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion length cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// HTTP timeout per request, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// OpenAI overrides.
    #[serde(default)]
    pub openai: EndpointConfig,
    /// Anthropic overrides.
    #[serde(default)]
    pub anthropic: EndpointConfig,
    /// Local server overrides.
    #[serde(default)]
    pub local: EndpointConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendSelector::default(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_ms: default_request_timeout_ms(),
            openai: EndpointConfig::default(),
            anthropic: EndpointConfig::default(),
            local: EndpointConfig::default(),
        }
    }
}

impl BackendConfig {
    /// Overrides for `selector`, if it is a remote backend.
    #[must_use]
    pub const fn endpoint(&self, selector: BackendSelector) -> Option<&EndpointConfig> {
        match selector {
            BackendSelector::RuleBased => None,
            BackendSelector::OpenAi => Some(&self.openai),
            BackendSelector::Anthropic => Some(&self.anthropic),
            BackendSelector::Local => Some(&self.local),
        }
    }

    /// Resolves connection settings for a remote selector using `lookup` for environment variables.
    pub fn remote_settings<F>(&self, selector: BackendSelector, lookup: F) -> Option<RemoteSettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides = self.endpoint(selector)?;
        let (endpoint, model) = match selector {
            BackendSelector::OpenAi => (OPENAI_ENDPOINT.to_string(), OPENAI_MODEL),
            BackendSelector::Anthropic => (ANTHROPIC_ENDPOINT.to_string(), ANTHROPIC_MODEL),
            BackendSelector::Local => (
                lookup("LANGMODEL_ENDPOINT").unwrap_or_else(|| LOCAL_ENDPOINT.to_string()),
                "local",
            ),
            BackendSelector::RuleBased => return None,
        };
        let mut settings = RemoteSettings::new(
            overrides.endpoint.clone().unwrap_or(endpoint),
            overrides.model.clone().unwrap_or_else(|| model.to_string()),
        );
        settings.temperature = self.temperature;
        settings.max_tokens = self.max_tokens;
        settings.request_timeout = Duration::from_millis(self.request_timeout_ms.max(1));
        let key_env = overrides
            .api_key_env
            .as_deref()
            .or_else(|| selector.default_key_env());
        settings.api_key = key_env.and_then(&lookup).filter(|key| !key.trim().is_empty());
        if selector == BackendSelector::Local {
            settings.jwt = lookup("LANGMODEL_JWT");
        }
        Some(settings)
    }
}

/// Builds the adapter for `selector`, reading credentials from the process environment.
pub fn build_backend(
    selector: BackendSelector,
    config: &BackendConfig,
) -> Result<Arc<dyn SimplificationAdapter>, AdapterError> {
    build_backend_with(selector, config, |name| env::var(name).ok())
}

/// Builds the adapter for `selector` with an explicit environment lookup.
pub fn build_backend_with<F>(
    selector: BackendSelector,
    config: &BackendConfig,
    lookup: F,
) -> Result<Arc<dyn SimplificationAdapter>, AdapterError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(settings) = config.remote_settings(selector, lookup) else {
        return Ok(Arc::new(RuleBasedSimplifier::new()));
    };
    Ok(match selector {
        BackendSelector::OpenAi => Arc::new(OpenAiSimplifier::new(settings)?),
        BackendSelector::Anthropic => Arc::new(AnthropicSimplifier::new(settings)?),
        BackendSelector::Local | BackendSelector::RuleBased => {
            Arc::new(HttpGenerateSimplifier::new(settings)?)
        }
    })
}
