/// Adapter contract, requests and errors.
pub mod adapter;
/// Backend selection and construction from configuration.
pub mod backend;
/// Prompt construction and completion cleanup.
pub mod prompt;
/// HTTP backends for hosted and local models.
pub mod remote;
/// Deterministic offline backend.
pub mod rulebased;

pub use adapter::{AdapterError, SimplificationAdapter, SimplificationRequest};
pub use backend::{
    build_backend, build_backend_with, BackendConfig, BackendSelector, EndpointConfig,
    ParseBackendError,
};
pub use remote::{AnthropicSimplifier, HttpGenerateSimplifier, OpenAiSimplifier, RemoteSettings};
pub use rulebased::{replace_jargon, RuleBasedSimplifier};
