//! Ollama local provider implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MaestroError, Result};
use crate::llm::{LlmProvider, ProviderResponse, RequestContext};

/// Locally-hosted Ollama provider.
///
/// Skipped by the router when a request sets `allow_local = false`.
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl OllamaProvider {
    /// Create a new Ollama provider.
    ///
    /// # Arguments
    ///
    /// * `model` - Default model (e.g. "qwen3:14b")
    /// * `base_url` - Ollama endpoint (e.g. "http://localhost:11434")
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
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
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate(&self, ctx: &RequestContext) -> Result<ProviderResponse> {
        let model = ctx.model.clone().unwrap_or_else(|| self.model.clone());

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

        let request = ChatRequest {
            model: model.clone(),
            messages,
            stream: false,
            options: Some(ChatOptions {
                temperature: ctx.temperature,
                num_predict: ctx.max_tokens,
            }),
        };

        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MaestroError::Provider {
                provider: "ollama".to_string(),
                message: format!("request failed: {}. Make sure Ollama is running.", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(MaestroError::Provider {
                provider: "ollama".to_string(),
                message: format!("api error ({}): {}", status, text),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| MaestroError::Provider {
            provider: "ollama".to_string(),
            message: format!("invalid response: {}", e),
        })?;

        let tokens_used =
            parsed.prompt_eval_count.unwrap_or(0) + parsed.eval_count.unwrap_or(0);

        Ok(ProviderResponse {
            content: parsed.message.content,
            model,
            tokens_used,
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
