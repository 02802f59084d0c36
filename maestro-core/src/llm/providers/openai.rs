//! OpenAI-compatible provider implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MaestroError, Result};
use crate::llm::{LlmProvider, ProviderResponse, RequestContext};

/// OpenAI chat-completions provider (also serves Azure and compatible APIs).
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - API key
    /// * `model` - Default model (e.g. "gpt-4o"); requests may override
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Create with a custom base URL (Azure OpenAI or compatible APIs).
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

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn build_messages(ctx: &RequestContext) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if let Some(system) = &ctx.system_prompt {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: ctx.query.clone(),
    });
    messages
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, ctx: &RequestContext) -> Result<ProviderResponse> {
        let model = ctx.model.clone().unwrap_or_else(|| self.model.clone());

        let request = ChatRequest {
            model: model.clone(),
            messages: build_messages(ctx),
            temperature: ctx.temperature,
            max_tokens: ctx.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| MaestroError::Provider {
                provider: "openai".to_string(),
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
                provider: "openai".to_string(),
                message: format!("api error ({}): {}", status, message),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| MaestroError::Provider {
            provider: "openai".to_string(),
            message: format!("invalid response: {}", e),
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| MaestroError::Provider {
                provider: "openai".to_string(),
                message: "response contained no choices".to_string(),
            })?;

        let mut metadata = HashMap::new();
        if let Some(reason) = choice.finish_reason {
            metadata.insert("finish_reason".to_string(), serde_json::json!(reason));
        }

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
            model,
            tokens_used: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
            metadata,
        })
    }
}
