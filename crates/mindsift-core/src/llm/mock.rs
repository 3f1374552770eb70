//! Scripted LLM provider for tests.
//!
//! Returns canned responses without making API calls. Supports
//! substring-keyed responses, an ordered failure/success script, and an
//! artificial delay for timeout tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{GenerationParams, LlmProvider, LlmResponse, TokenUsage};
use crate::error::LlmError;

/// One step of a scripted provider run.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Succeed with this content.
    Ok(String),
    /// Fail with an API error of this status.
    ApiError(u16),
    /// Fail with a rate limit carrying this retry-after hint.
    RateLimited(u64),
}

/// Mock LLM provider for testing.
pub struct MockProvider {
    name: String,
    model: String,
    responses: Mutex<Vec<(String, String)>>,
    default_response: Mutex<String>,
    script: Mutex<VecDeque<ScriptStep>>,
    calls: Mutex<Vec<String>>,
    call_count: AtomicU32,
    fail_status: Option<u16>,
    delay: Option<Duration>,
}

impl MockProvider {
    /// A provider that answers every prompt with the default response.
    pub fn new(name: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            responses: Mutex::new(Vec::new()),
            default_response: Mutex::new(
                "{\"insights\": [], \"meta\": {\"content_quality\": \"low\"}}".to_string(),
            ),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
            fail_status: None,
            delay: None,
        }
    }

    /// A provider that always fails with the given API status.
    pub fn failing(name: &str, model: &str, status: u16) -> Self {
        Self {
            fail_status: Some(status),
            ..Self::new(name, model)
        }
    }

    /// Respond with `response` to any prompt containing `key`.
    #[must_use]
    pub fn with_response(self, key: &str, response: &str) -> Self {
        self.responses
            .lock()
            .expect("lock")
            .push((key.to_string(), response.to_string()));
        self
    }

    /// Set the response used when no key matches.
    #[must_use]
    pub fn with_default_response(self, response: &str) -> Self {
        *self.default_response.lock().expect("lock") = response.to_string();
        self
    }

    /// Run through an ordered script before falling back to keyed responses.
    #[must_use]
    pub fn with_script(self, steps: Vec<ScriptStep>) -> Self {
        *self.script.lock().expect("lock") = steps.into();
        self
    }

    /// Sleep this long before answering (for timeout tests).
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// All prompts seen so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    /// Number of generate calls made.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        _system: Option<&str>,
        params: &GenerationParams,
    ) -> Result<LlmResponse, LlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().expect("lock").push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(step) = self.script.lock().expect("lock").pop_front() {
            return match step {
                ScriptStep::Ok(content) => Ok(LlmResponse {
                    content,
                    usage: TokenUsage {
                        input_tokens: 100,
                        output_tokens: 50,
                    },
                    model: params.model.clone().unwrap_or_else(|| self.model.clone()),
                }),
                ScriptStep::ApiError(status) => Err(LlmError::Api {
                    status,
                    message: format!("scripted {status}"),
                }),
                ScriptStep::RateLimited(retry_after_secs) => {
                    Err(LlmError::RateLimited { retry_after_secs })
                }
            };
        }

        if let Some(status) = self.fail_status {
            return Err(LlmError::Api {
                status,
                message: format!("mock failure {status}"),
            });
        }

        let responses = self.responses.lock().expect("lock");
        let content = responses
            .iter()
            .find(|(key, _)| prompt.contains(key))
            .map_or_else(
                || self.default_response.lock().expect("lock").clone(),
                |(_, response)| response.clone(),
            );

        Ok(LlmResponse {
            content,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: params.model.clone().unwrap_or_else(|| self.model.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyed_and_default_responses() {
        let provider = MockProvider::new("mock", "mock-model")
            .with_response("themes", "{\"themes\": []}")
            .with_default_response("fallback");

        let keyed = provider
            .generate("list the themes here", None, &GenerationParams::default())
            .await
            .expect("generate");
        assert_eq!(keyed.content, "{\"themes\": []}");

        let fallback = provider
            .generate("anything else", None, &GenerationParams::default())
            .await
            .expect("generate");
        assert_eq!(fallback.content, "fallback");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn script_takes_precedence_then_drains() {
        let provider = MockProvider::new("mock", "m").with_script(vec![
            ScriptStep::ApiError(500),
            ScriptStep::Ok("recovered".to_string()),
        ]);

        assert!(provider
            .generate("p", None, &GenerationParams::default())
            .await
            .is_err());
        let second = provider
            .generate("p", None, &GenerationParams::default())
            .await
            .expect("generate");
        assert_eq!(second.content, "recovered");
    }

    #[tokio::test]
    async fn failing_provider_always_errors() {
        let provider = MockProvider::failing("down", "m", 503);
        let err = provider
            .generate("p", None, &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 503, .. }));
    }
}
