//! Provider construction from configuration.
//!
//! Walks the configured preference chain and instantiates each provider
//! that has credentials. Unconfigured names are silently skipped;
//! unknown names are skipped with a warning.

use std::sync::Arc;

use super::anthropic::AnthropicProvider;
use super::openai_compat::OpenAiCompatProvider;
use super::router::ProviderRouter;
use super::LlmProvider;
use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::storage::DbPool;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Build the provider chain from config, in preference order.
///
/// A provider is configured when it has an API key (Ollama needs only a
/// model, since local inference is unauthenticated).
pub fn build_providers(config: &RouterConfig) -> Vec<Arc<dyn LlmProvider>> {
    let mut chain: Vec<Arc<dyn LlmProvider>> = Vec::new();

    for name in &config.provider_preference {
        match name.as_str() {
            "anthropic" => {
                let Some(api_key) = config.anthropic.api_key.clone() else {
                    continue;
                };
                let model = if config.anthropic.model.is_empty() {
                    "claude-sonnet-4-20250514".to_string()
                } else {
                    config.anthropic.model.clone()
                };
                chain.push(Arc::new(match &config.anthropic.base_url {
                    Some(base_url) => {
                        AnthropicProvider::with_base_url(api_key, model, base_url.clone())
                    }
                    None => AnthropicProvider::new(api_key, model),
                }));
            }
            "openai" => {
                let Some(api_key) = config.openai.api_key.clone() else {
                    continue;
                };
                let model = if config.openai.model.is_empty() {
                    "gpt-4o-mini".to_string()
                } else {
                    config.openai.model.clone()
                };
                let base_url = config
                    .openai
                    .base_url
                    .clone()
                    .unwrap_or_else(|| OPENAI_BASE_URL.to_string());
                chain.push(Arc::new(OpenAiCompatProvider::new(
                    base_url,
                    api_key,
                    model,
                    "openai".to_string(),
                )));
            }
            "ollama" => {
                if config.ollama.model.is_empty() {
                    continue;
                }
                let base_url = config
                    .ollama
                    .base_url
                    .clone()
                    .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());
                chain.push(Arc::new(OpenAiCompatProvider::new(
                    base_url,
                    config.ollama.api_key.clone().unwrap_or_default(),
                    config.ollama.model.clone(),
                    "ollama".to_string(),
                )));
            }
            unknown => {
                tracing::warn!(provider = unknown, "unknown provider in preference chain");
            }
        }
    }

    chain
}

/// Build a router from config. Errors when no provider is configured.
pub fn build_router(config: &RouterConfig, pool: DbPool) -> Result<ProviderRouter, RouterError> {
    ProviderRouter::new(
        build_providers(config),
        config.max_retries,
        config.timeout_ms,
        pool,
    )
}
