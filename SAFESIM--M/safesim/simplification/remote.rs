use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::simplification::{
    adapter::{AdapterError, SimplificationAdapter, SimplificationRequest},
    prompt::{clean_completion, completion_prompt, user_prompt, SYSTEM_PROMPT},
};

/// Default chat-completions endpoint.
pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
/// Default messages endpoint.
pub const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
/// Default local generation endpoint.
pub const LOCAL_ENDPOINT: &str = "http://127.0.0.1:9000/generate";
/// Default chat model.
pub const OPENAI_MODEL: &str = "gpt-4o-mini";
/// Default messages model.
pub const ANTHROPIC_MODEL: &str = "claude-haiku-4-5-20251001";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Connection parameters for a hosted or local generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSettings {
    /// Full request URL.
    pub endpoint: String,
    /// Model identifier (ignored by plain `/generate` servers).
    pub model: String,
    /// Credential, sent as bearer token or `x-api-key` depending on the service.
    pub api_key: Option<String>,
    /// Additional bearer token for local servers behind an auth proxy.
    pub jwt: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion length cap.
    pub max_tokens: u32,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl RemoteSettings {
    /// Settings with the shared generation defaults (temperature 0.3, 500 tokens, 30 s).
    #[must_use]
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            jwt: None,
            temperature: 0.3,
            max_tokens: 500,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn client(&self) -> Result<Client, AdapterError> {
        Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|err| AdapterError::Configuration(err.to_string()))
    }

    fn require_key(&self, service: &str) -> Result<String, AdapterError> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AdapterError::Configuration(format!("{service} API key not set")))
    }
}

fn transport_error(err: &reqwest::Error, timeout: Duration) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout(timeout)
    } else if err.is_decode() {
        AdapterError::MalformedResponse(err.to_string())
    } else {
        AdapterError::Unavailable(err.to_string())
    }
}

async fn send(request: RequestBuilder, timeout: Duration) -> Result<Response, AdapterError> {
    let response = request
        .send()
        .await
        .map_err(|err| transport_error(&err, timeout))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => AdapterError::RateLimited(message),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            AdapterError::Unavailable(format!("{status}: {message}"))
        }
        other => AdapterError::Backend {
            status: other.as_u16(),
            message,
        },
    })
}

fn non_empty(raw: &str) -> Result<String, AdapterError> {
    let text = clean_completion(raw);
    if text.is_empty() {
        Err(AdapterError::MalformedResponse("empty completion".into()))
    } else {
        Ok(text)
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions backend (OpenAI-compatible).
#[derive(Debug, Clone)]
pub struct OpenAiSimplifier {
    client: Client,
    settings: RemoteSettings,
    api_key: String,
}

impl OpenAiSimplifier {
    /// Creates the backend; fails when no API key is configured.
    pub fn new(settings: RemoteSettings) -> Result<Self, AdapterError> {
        let api_key = settings.require_key("OpenAI")?;
        Ok(Self {
            client: settings.client()?,
            settings,
            api_key,
        })
    }
}

#[async_trait]
impl SimplificationAdapter for OpenAiSimplifier {
    fn name(&self) -> &str {
        "openai"
    }

    async fn simplify(&self, request: &SimplificationRequest) -> Result<String, AdapterError> {
        let prompt = user_prompt(request);
        let payload = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        debug!(model = %self.settings.model, attempt = request.attempt, "calling chat completions");
        let call = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload);
        let response = send(call, self.settings.request_timeout).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|err| AdapterError::MalformedResponse(err.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AdapterError::MalformedResponse("no choices in response".into()))?;
        non_empty(&content)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Messages-API backend (Anthropic).
#[derive(Debug, Clone)]
pub struct AnthropicSimplifier {
    client: Client,
    settings: RemoteSettings,
    api_key: String,
}

impl AnthropicSimplifier {
    /// Creates the backend; fails when no API key is configured.
    pub fn new(settings: RemoteSettings) -> Result<Self, AdapterError> {
        let api_key = settings.require_key("Anthropic")?;
        Ok(Self {
            client: settings.client()?,
            settings,
            api_key,
        })
    }
}

#[async_trait]
impl SimplificationAdapter for AnthropicSimplifier {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn simplify(&self, request: &SimplificationRequest) -> Result<String, AdapterError> {
        let prompt = user_prompt(request);
        let payload = MessagesRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            system: SYSTEM_PROMPT,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
        };
        debug!(model = %self.settings.model, attempt = request.attempt, "calling messages api");
        let call = self
            .client
            .post(&self.settings.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload);
        let response = send(call, self.settings.request_timeout).await?;
        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|err| AdapterError::MalformedResponse(err.to_string()))?;
        let text = body
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| AdapterError::MalformedResponse("no text block in response".into()))?;
        non_empty(&text)
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    text: String,
}

/// Backend for local model servers exposing `POST /generate` (`{prompt}` in, `{text}` out).
#[derive(Debug, Clone)]
pub struct HttpGenerateSimplifier {
    client: Client,
    settings: RemoteSettings,
}

impl HttpGenerateSimplifier {
    /// Creates the backend; credentials are optional.
    pub fn new(settings: RemoteSettings) -> Result<Self, AdapterError> {
        Ok(Self {
            client: settings.client()?,
            settings,
        })
    }

    /// Endpoint in use.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.settings.endpoint
    }
}

#[async_trait]
impl SimplificationAdapter for HttpGenerateSimplifier {
    fn name(&self) -> &str {
        "local"
    }

    async fn simplify(&self, request: &SimplificationRequest) -> Result<String, AdapterError> {
        let prompt = completion_prompt(request);
        let payload = GenerateRequest {
            prompt: &prompt,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            top_p: 0.9,
        };
        let mut call = self.client.post(&self.settings.endpoint).json(&payload);
        if let Some(key) = &self.settings.api_key {
            call = call.header("x-api-key", key);
        }
        if let Some(token) = &self.settings.jwt {
            call = call.bearer_auth(token);
        }
        let response = send(call, self.settings.request_timeout).await?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|err| AdapterError::MalformedResponse(err.to_string()))?;
        non_empty(&body.text)
    }
}
