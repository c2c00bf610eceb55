//! OpenAI-compatible scoring backend.
//!
//! Supports OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any
//! endpoint that follows the OpenAI chat completions API format.

use super::{build_client, is_local_url, map_http_error, map_transport_error, resolve_api_key};
use crate::backend::{ScoringBackend, ScoringPrompt};
use crate::config::LlmConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible scoring backend.
pub struct OpenAiCompatibleBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    timeout_secs: u64,
}

impl OpenAiCompatibleBackend {
    /// Create a new backend from configuration.
    ///
    /// Local endpoints (localhost, 127.0.0.1) do not need an API key.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = match resolve_api_key(config, "OpenAI-compatible") {
            Ok(key) => key,
            Err(_) if is_local_url(config.base_url.as_deref()) => {
                debug!("No API key set for local provider; using dummy bearer token");
                "local".to_string()
            }
            Err(e) => return Err(e),
        };
        Self::new_with_key(config, api_key)
    }

    /// Create a new backend with an explicitly provided API key.
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
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }

    /// Extract the assistant text from a chat completion body.
    fn parse_response(body: &Value) -> Result<String, LlmError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No message in choice".to_string(),
            })?;

        // A null content (refusal, tool call) is an empty answer, which the
        // evaluator treats as unparsable and retries.
        Ok(message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl ScoringBackend for OpenAiCompatibleBackend {
    async fn generate(&self, prompt: &ScoringPrompt) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "Sending OpenAI completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_secs))?;

        let status = response.status();
        let retry_hint = super::retry_after_from_headers(response.headers());
        let response_body = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_secs))?;

        if !status.is_success() {
            let hint = retry_hint.or_else(|| retry_hint_from_body(&response_body));
            return Err(map_http_error("OpenAI-compatible", status, &response_body, hint));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        Self::parse_response(&json)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// OpenAI phrases rate limits as "... Please try again in 20s."
fn retry_hint_from_body(body: &str) -> Option<u64> {
    let message = serde_json::from_str::<Value>(body)
        .ok()?
        .get("error")?
        .get("message")?
        .as_str()?
        .to_string();
    let tail = message.rsplit("try again in ").next()?;
    let number: String = tail
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.parse::<f64>().ok().map(|secs| secs.ceil() as u64)
}
