//! Anthropic Messages API scoring backend.
//!
//! Differences from the OpenAI format:
//! - System prompt is a top-level `system` field
//! - `x-api-key` auth header instead of a bearer token
//! - Required `anthropic-version` header
//! - Response text arrives as a list of content blocks

use super::{build_client, map_http_error, map_transport_error, resolve_api_key};
use crate::backend::{ScoringBackend, ScoringPrompt};
use crate::config::LlmConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    timeout_secs: u64,
}

impl AnthropicBackend {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = resolve_api_key(config, "Anthropic")?;
        Self::new_with_key(config, api_key)
    }

    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: build_client(config)?,
            base_url,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn request_body(&self, prompt: &ScoringPrompt) -> Value {
        json!({
            "model": self.model,
            "system": prompt.system,
            "messages": [{ "role": "user", "content": prompt.user }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }

    /// Concatenate the text blocks of a Messages API response.
    fn parse_response(body: &Value) -> Result<String, LlmError> {
        let blocks = body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No content blocks in response".to_string(),
            })?;

        Ok(blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl ScoringBackend for AnthropicBackend {
    async fn generate(&self, prompt: &ScoringPrompt) -> Result<String, LlmError> {
        let url = format!("{}/messages", self.base_url);
        debug!(url = %url, model = %self.model, "Sending Anthropic messages request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_secs))?;

        let status = response.status();
        let retry_hint = super::retry_after_from_headers(response.headers());
        let body_text = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_secs))?;

        if !status.is_success() {
            return Err(map_http_error("Anthropic", status, &body_text, retry_hint));
        }

        let json: Value = serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })?;

        Self::parse_response(&json)
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_backend() -> AnthropicBackend {
        let config = LlmConfig {
            provider: "anthropic".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            api_key: Some("sk-ant-test".to_string()),
            ..LlmConfig::default()
        };
        AnthropicBackend::new(&config).unwrap()
    }

    #[test]
    fn test_default_base_url() {
        let backend = make_backend();
        assert_eq!(backend.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_missing_key_returns_auth_failed() {
        let config = LlmConfig {
            provider: "anthropic".to_string(),
            api_key_env: "AUTOGRADE_TEST_ANTHROPIC_KEY_UNSET".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            AnthropicBackend::new(&config),
            Err(LlmError::AuthFailed { .. })
        ));
    }

    #[test]
    fn test_request_body_puts_system_at_top_level() {
        let body = make_backend().request_body(&ScoringPrompt {
            system: "grade".into(),
            user: "print(1)".into(),
        });
        assert_eq!(body["system"], "grade");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["content"], "print(1)");
    }

    #[test]
    fn test_parse_text_blocks() {
        let body = json!({
            "content": [
                {"type": "text", "text": "Reasoning: tidy.\n"},
                {"type": "text", "text": "Score: 2"}
            ]
        });
        assert_eq!(
            AnthropicBackend::parse_response(&body).unwrap(),
            "Reasoning: tidy.\nScore: 2"
        );
    }

    #[test]
    fn test_parse_missing_content() {
        let body = json!({"type": "error"});
        assert!(AnthropicBackend::parse_response(&body).is_err());
    }
}
