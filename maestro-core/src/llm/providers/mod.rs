//! Provider implementations
//!
//! Each backend speaks its own HTTP dialect behind the common
//! [`LlmProvider`](crate::llm::LlmProvider) trait. A provider is enabled by
//! the presence of its credential in configuration; see
//! [`build_providers`].

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::llm::LlmProvider;

pub mod anthropic;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Build the provider set from configuration.
///
/// A provider whose API key (or base URL, for Ollama) is absent is simply
/// not constructed. The returned order is the configured failover priority:
/// openai, anthropic, ollama.
pub fn build_providers(config: &OrchestratorConfig) -> Vec<Arc<dyn LlmProvider>> {
    let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();

    if let Some(key) = &config.providers.openai_api_key {
        providers.push(Arc::new(OpenAiProvider::new(key.clone(), "gpt-4o")));
    }
    if let Some(key) = &config.providers.anthropic_api_key {
        providers.push(Arc::new(AnthropicProvider::new(
            key.clone(),
            "claude-3-5-sonnet-20241022",
        )));
    }
    if let Some(base_url) = &config.providers.ollama_base_url {
        providers.push(Arc::new(OllamaProvider::new("qwen3:14b", base_url.clone())));
    }

    providers
}
