use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input to one generation call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimplificationRequest {
    /// Clinical text to simplify.
    pub source_text: String,
    /// Values that must appear verbatim in the output.
    pub must_include: Vec<String>,
    /// Corrections from the previous attempt (`include: 50mg`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction_hints: Option<Vec<String>>,
    /// 1-based attempt number.
    pub attempt: usize,
}

impl SimplificationRequest {
    /// First-attempt request without corrections.
    #[must_use]
    pub fn new(source_text: impl Into<String>, must_include: Vec<String>) -> Self {
        Self {
            source_text: source_text.into(),
            must_include,
            correction_hints: None,
            attempt: 1,
        }
    }

    /// Sets the correction hints; an empty list clears them.
    #[must_use]
    pub fn with_corrections(mut self, hints: Vec<String>) -> Self {
        self.correction_hints = if hints.is_empty() { None } else { Some(hints) };
        self
    }

    /// Sets the attempt number.
    #[must_use]
    pub const fn with_attempt(mut self, attempt: usize) -> Self {
        self.attempt = attempt;
        self
    }

    /// Correction hints, empty on a first attempt.
    #[must_use]
    pub fn hints(&self) -> &[String] {
        self.correction_hints.as_deref().unwrap_or_default()
    }
}

/// Failure of a generation backend.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Call exceeded the generation timeout.
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    /// Backend could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// Backend refused the call because of rate limits.
    #[error("backend rate limited: {0}")]
    RateLimited(String),
    /// Backend answered with an error.
    #[error("backend error (status {status}): {message}")]
    Backend {
        /// HTTP status or backend-specific code.
        status: u16,
        /// Error body or message.
        message: String,
    },
    /// Response could not be interpreted.
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
    /// Backend is misconfigured (missing credentials, bad endpoint).
    #[error("backend configuration error: {0}")]
    Configuration(String),
    /// Generation panicked inside the backend.
    #[error("backend panicked: {0}")]
    Panicked(String),
}

impl AdapterError {
    /// Whether retrying the same backend could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Unavailable(_) | Self::RateLimited(_) | Self::Panicked(_) => {
                true
            }
            Self::Backend { status, .. } => *status >= 500,
            Self::MalformedResponse(_) | Self::Configuration(_) => false,
        }
    }
}

/// Generative backend turning clinical text into plain language.
///
/// The orchestrator only depends on this trait; hosted APIs, local model
/// servers and the rule-based fallback are interchangeable behind it.
#[async_trait]
pub trait SimplificationAdapter: Send + Sync {
    /// Backend name recorded in results.
    fn name(&self) -> &str;

    /// Produces one candidate simplification.
    async fn simplify(&self, request: &SimplificationRequest) -> Result<String, AdapterError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrections_are_optional() {
        let request = SimplificationRequest::new("text", vec!["50mg".into()]);
        assert!(request.hints().is_empty());
        assert_eq!(request.attempt, 1);
        let retry = request
            .clone()
            .with_corrections(vec!["include: 50mg".into()])
            .with_attempt(2);
        assert_eq!(retry.hints(), ["include: 50mg"]);
        assert!(request.with_corrections(Vec::new()).correction_hints.is_none());
    }

    #[test]
    fn classifies_transient_errors() {
        assert!(AdapterError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(AdapterError::RateLimited("slow down".into()).is_transient());
        assert!(AdapterError::Backend {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(!AdapterError::Backend {
            status: 401,
            message: "bad key".into()
        }
        .is_transient());
        assert!(!AdapterError::Configuration("missing key".into()).is_transient());
    }
}
