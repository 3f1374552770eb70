//! OpenAI-compatible LLM provider.
//!
//! Works with both OpenAI (cloud) and Ollama (local) since they share
//! the same chat completions request/response format.

use super::{GenerationParams, LlmProvider, LlmResponse, TokenUsage};
use crate::error::LlmError;
use serde::{Deserialize, Serialize};

/// An LLM provider using the OpenAI chat completions API format.
///
/// Compatible with OpenAI, Ollama, and any OpenAI-compatible endpoint.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    provider_name: String,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(base_url: String, api_key: String, model: String, provider_name: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
            provider_name,
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        params: &GenerationParams,
    ) -> Result<LlmResponse, LlmError> {
        let model = params.model.as_deref().unwrap_or(&self.model);

        tracing::debug!(
            provider = %self.provider_name,
            model = %model,
            max_tokens = params.max_tokens,
            "LLM request",
        );

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system.filter(|s| !s.is_empty()) {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatCompletionRequest {
            model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();

            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                return Err(LlmError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }

            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status,
                message: body,
            });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("failed to parse response: {e}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let usage = body.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            input_tokens: u.prompt_tokens.unwrap_or(0),
            output_tokens: u.completion_tokens.unwrap_or(0),
        });

        tracing::debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            chars = content.len(),
            "LLM response",
        );

        Ok(LlmResponse {
            content,
            usage,
            model: body.model,
        })
    }
}

// --- Internal Serde types ---

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(
            server.uri(),
            "test-key".into(),
            "gpt-4o-mini".into(),
            "openai".into(),
        )
    }

    #[tokio::test]
    async fn generate_success() {
        let server = MockServer::start().await;

        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello there"}}],
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 12, "completion_tokens": 4}
        });

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let resp = provider(&server)
            .generate("hi", Some("system"), &GenerationParams::default())
            .await
            .expect("generate");

        assert_eq!(resp.content, "Hello there");
        assert_eq!(resp.usage.input_tokens, 12);
        assert_eq!(resp.usage.output_tokens, 4);
    }

    #[tokio::test]
    async fn system_message_omitted_when_absent() {
        let server = MockServer::start().await;

        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "OK"}}],
            "model": "gpt-4o-mini"
        });

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(wiremock::matchers::body_partial_json(serde_json::json!({
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let resp = provider(&server)
            .generate("hi", None, &GenerationParams::default())
            .await
            .expect("generate");
        assert_eq!(resp.content, "OK");
    }

    #[tokio::test]
    async fn error_500_maps_to_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate("hi", None, &GenerationParams::default())
            .await
            .unwrap_err();

        match err {
            LlmError::Api { status, .. } => assert_eq!(status, 500),
            other => panic!("expected Api, got: {other}"),
        }
    }

    #[tokio::test]
    async fn error_429_maps_to_rate_limited() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .append_header("retry-after", "20")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate("hi", None, &GenerationParams::default())
            .await
            .unwrap_err();

        match err {
            LlmError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 20),
            other => panic!("expected RateLimited, got: {other}"),
        }
    }

    #[test]
    fn provider_name_is_configurable() {
        let p = OpenAiCompatProvider::new(
            "http://localhost:11434/v1".into(),
            String::new(),
            "llama3.1".into(),
            "ollama".into(),
        );
        assert_eq!(p.name(), "ollama");
    }
}
