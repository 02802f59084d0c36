//! LLM provider abstraction and implementations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::request::OrchestratorRequest;

pub mod providers;
pub mod retry;

pub use retry::{with_retry, RetryConfig};

/// Typed request view handed to providers.
///
/// The orchestrator's free-form `context` bag is projected onto the typed
/// fields here; the remainder travels in `metadata` as pass-through
/// telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Prompt or query text to generate against
    pub query: String,

    /// Request classification
    #[serde(default)]
    pub request_type: String,

    /// Role of the requesting user
    #[serde(default)]
    pub user_role: String,

    /// Permissions held by the requesting user
    #[serde(default)]
    pub user_permissions: Vec<String>,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub org_id: String,

    #[serde(default)]
    pub tenant_id: String,

    /// Provider override; `None` lets the router choose
    #[serde(default)]
    pub provider: Option<String>,

    /// Model override; `None` uses the provider's configured model
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Whether locally-hosted providers may serve this request
    #[serde(default = "default_allow_local")]
    pub allow_local: bool,

    /// Pass-through of the original request context
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_allow_local() -> bool {
    true
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            query: String::new(),
            request_type: String::new(),
            user_role: String::new(),
            user_permissions: Vec::new(),
            client_id: String::new(),
            org_id: String::new(),
            tenant_id: String::new(),
            provider: None,
            model: None,
            max_tokens: None,
            temperature: None,
            system_prompt: None,
            allow_local: true,
            metadata: HashMap::new(),
        }
    }
}

impl RequestContext {
    /// Create a context carrying only a prompt.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            query: prompt.into(),
            ..Self::default()
        }
    }

    /// Project an [`OrchestratorRequest`] onto the typed view.
    ///
    /// Coercions for externally-supplied context values: `max_tokens`
    /// accepts an integer or a float (truncated), `temperature` must be a
    /// float; any other type silently yields the zero-value default.
    pub fn from_request(request: &OrchestratorRequest) -> Self {
        let ctx = &request.context;

        let provider = ctx
            .get("provider")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let model = ctx
            .get("model")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let system_prompt = ctx
            .get("system_prompt")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let max_tokens = ctx.get("max_tokens").and_then(coerce_max_tokens);
        let temperature = ctx
            .get("temperature")
            .and_then(|v| v.as_f64())
            .filter(|v| v.is_finite())
            .map(|v| v as f32);
        let allow_local = ctx
            .get("allow_local")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let mut permissions: Vec<String> = request.user.permissions.iter().cloned().collect();
        permissions.sort();

        Self {
            query: request.query.clone(),
            request_type: request.request_type.clone(),
            user_role: request.user.role.clone(),
            user_permissions: permissions,
            client_id: request.client.id.clone(),
            org_id: request.client.org_id.clone(),
            tenant_id: request.tenant_id().to_string(),
            provider,
            model,
            max_tokens,
            temperature,
            system_prompt,
            allow_local,
            metadata: request.context.clone(),
        }
    }

    /// Replace the prompt, keeping identity and overrides.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.query = prompt.into();
        self
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max-token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

fn coerce_max_tokens(value: &serde_json::Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok();
    }
    // Floats are truncated toward zero
    value
        .as_f64()
        .filter(|f| f.is_finite() && *f >= 0.0)
        .map(|f| f as u32)
}

/// Raw response from a single provider invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Generated text
    pub content: String,

    /// Model that produced the text
    pub model: String,

    /// Total tokens consumed
    #[serde(default)]
    pub tokens_used: u32,

    /// Provider-specific metadata (finish reason, ...)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Routed response, annotated with timing by the router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub tokens_used: u32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Wall-clock time of the provider invocation
    #[serde(default)]
    pub response_time_ms: u64,
}

impl LlmResponse {
    /// Annotate a provider response with routing timing.
    pub fn from_provider(response: ProviderResponse, response_time_ms: u64) -> Self {
        Self {
            content: response.content,
            model: response.model,
            tokens_used: response.tokens_used,
            metadata: response.metadata,
            response_time_ms,
        }
    }

    /// Whether a JSON value has the shape of a serialized [`LlmResponse`].
    ///
    /// Used by template substitution, which replaces whole-response values
    /// with their `content` field.
    pub fn is_response_value(value: &serde_json::Value) -> bool {
        value
            .as_object()
            .is_some_and(|o| o.contains_key("content") && o.contains_key("model"))
    }
}

/// A language-model backend.
///
/// Implementations are registered with the router; the kernel never calls
/// a provider directly.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. "openai", "ollama")
    fn name(&self) -> &str;

    /// Generate a completion for the given context.
    async fn generate(&self, ctx: &RequestContext) -> Result<ProviderResponse>;

    /// Lightweight transport check.
    async fn health_check(&self) -> bool {
        true
    }

    /// Whether the provider runs on local infrastructure.
    ///
    /// Local providers are skipped when the request sets
    /// `allow_local = false`.
    fn is_local(&self) -> bool {
        false
    }
}
