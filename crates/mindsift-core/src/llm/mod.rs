//! LLM provider abstraction and implementations.
//!
//! Provides a trait-based abstraction for LLM providers (Anthropic,
//! OpenAI, Ollama) with typed responses and token usage tracking, a
//! multi-provider router with failover and per-provider circuit breakers,
//! and a price table for cost accounting.

pub mod anthropic;
pub mod factory;
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;
pub mod openai_compat;
pub mod pricing;
pub mod router;

use crate::error::LlmError;

/// Token usage information from an LLM completion.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the input/prompt.
    pub input_tokens: u32,
    /// Number of tokens in the output/completion.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Total tokens across input and output.
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulate token counts from another usage record (e.g. across retries).
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LlmResponse {
    /// The generated text content.
    pub content: String,
    /// Token usage for this completion.
    pub usage: TokenUsage,
    /// The model that produced this response.
    pub model: String,
}

/// Parameters controlling LLM generation behavior.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Sampling temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f32,
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
    /// Per-call model override. `None` uses the provider's default model.
    pub model: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2000,
            model: None,
        }
    }
}

/// A routed generation request, including the ledger tag.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// User prompt / main content.
    pub prompt: String,
    /// System instructions, if any.
    pub system: Option<String>,
    /// Sampling and length parameters.
    pub params: GenerationParams,
    /// What the tokens were spent on (e.g. "extract", "correlate").
    pub purpose: String,
}

impl LlmRequest {
    /// Build a request with default parameters.
    pub fn new(prompt: impl Into<String>, purpose: &str) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            params: GenerationParams::default(),
            purpose: purpose.to_string(),
        }
    }
}

/// Trait abstracting all LLM provider operations.
///
/// Implementations include `OpenAiCompatProvider` (for OpenAI and Ollama)
/// and `AnthropicProvider`. The trait is object-safe for use as
/// `Arc<dyn LlmProvider>`.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the display name of this provider (e.g., "anthropic", "openai").
    fn name(&self) -> &str;

    /// Returns the default model this provider generates with.
    fn default_model(&self) -> &str;

    /// Send a generation request to the LLM.
    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        params: &GenerationParams,
    ) -> Result<LlmResponse, LlmError>;
}

/// Strip Markdown code fences and surrounding prose from a model
/// response that is supposed to be a JSON document.
///
/// Models regularly wrap JSON in ```json fences or preface it with a
/// sentence; this trims to the outermost `{...}` or `[...]` span.
pub fn strip_json_fences(content: &str) -> &str {
    let trimmed = content.trim();

    let inner = if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        match after.find("```") {
            Some(end) => after[..end].trim(),
            None => after.trim(),
        }
    } else {
        trimmed
    };

    let object_start = inner.find('{');
    let array_start = inner.find('[');
    let start = match (object_start, array_start) {
        (Some(o), Some(a)) => Some(o.min(a)),
        (Some(o), None) => Some(o),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    };
    let Some(start) = start else { return inner };

    let close = if inner.as_bytes()[start] == b'{' { '}' } else { ']' };
    match inner.rfind(close) {
        Some(end) if end > start => &inner[start..=end],
        _ => &inner[start..],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_accumulates() {
        let mut usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 40,
        };
        usage.accumulate(&TokenUsage {
            input_tokens: 50,
            output_tokens: 10,
        });
        assert_eq!(usage.input_tokens, 150);
        assert_eq!(usage.output_tokens, 50);
        assert_eq!(usage.total_tokens(), 200);
    }

    #[test]
    fn default_params() {
        let params = GenerationParams::default();
        assert_eq!(params.max_tokens, 2000);
        assert!(params.model.is_none());
    }

    #[test]
    fn strip_json_fences_handles_plain_json() {
        assert_eq!(strip_json_fences("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn strip_json_fences_handles_fenced_json() {
        let content = "Here you go:\n```json\n{\"a\": 1}\n```\nHope that helps!";
        assert_eq!(strip_json_fences(content), "{\"a\": 1}");
    }

    #[test]
    fn strip_json_fences_trims_prose_around_object() {
        let content = "The result is {\"a\": [1, 2]} as requested.";
        assert_eq!(strip_json_fences(content), "{\"a\": [1, 2]}");
    }

    #[test]
    fn strip_json_fences_handles_arrays() {
        assert_eq!(strip_json_fences("sure: [1, 2, 3]."), "[1, 2, 3]");
    }
}
