//! Anthropic messages-API provider implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MaestroError, Result};
use crate::llm::{LlmProvider, ProviderResponse, RequestContext};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Anthropic provider (Claude models).
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    /// Create with a custom base URL (proxies, gateways).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
        }
    }

    /// Get the default model name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, ctx: &RequestContext) -> Result<ProviderResponse> {
        let model = ctx.model.clone().unwrap_or_else(|| self.model.clone());

        let request = MessagesRequest {
            model: model.clone(),
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: ctx.query.clone(),
            }],
            system: ctx.system_prompt.clone(),
            max_tokens: ctx.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: ctx.temperature,
        };

        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| MaestroError::Provider {
                provider: "anthropic".to_string(),
                message: format!("request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());

            let message = match serde_json::from_str::<ApiError>(&text) {
                Ok(err) => err.error.message,
                Err(_) => text,
            };

            return Err(MaestroError::Provider {
                provider: "anthropic".to_string(),
                message: format!("api error ({}): {}", status, message),
            });
        }

        let parsed: MessagesResponse =
            response.json().await.map_err(|e| MaestroError::Provider {
                provider: "anthropic".to_string(),
                message: format!("invalid response: {}", e),
            })?;

        let content = parsed
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let mut metadata = HashMap::new();
        if let Some(reason) = parsed.stop_reason {
            metadata.insert("stop_reason".to_string(), serde_json::json!(reason));
        }

        Ok(ProviderResponse {
            content,
            model,
            tokens_used: parsed
                .usage
                .map(|u| u.input_tokens + u.output_tokens)
                .unwrap_or(0),
            metadata,
        })
    }
}
