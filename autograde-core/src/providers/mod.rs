//! Scoring backend implementations.
//!
//! Provides concrete implementations of the `ScoringBackend` trait for:
//! - OpenAI-compatible APIs (OpenAI, Azure, Ollama, vLLM, LM Studio)
//! - Anthropic Messages API
//!
//! Use `create_backend()` to instantiate the appropriate backend based on config.

pub mod anthropic;
pub mod openai_compat;

use crate::backend::ScoringBackend;
use crate::config::LlmConfig;
use crate::error::LlmError;
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

pub use anthropic::AnthropicBackend;
pub use openai_compat::OpenAiCompatibleBackend;

/// Default delay when a provider rate-limits without saying for how long.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Create a scoring backend based on the configuration.
///
/// Routes to the appropriate implementation:
/// - `"anthropic"` → `AnthropicBackend` (native Anthropic Messages API)
/// - Everything else → `OpenAiCompatibleBackend` (OpenAI, Azure, Ollama, local, etc.)
pub fn create_backend(config: &LlmConfig) -> Result<Arc<dyn ScoringBackend>, LlmError> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicBackend::new(config)?)),
        _ => Ok(Arc::new(OpenAiCompatibleBackend::new(config)?)),
    }
}

/// Resolve the API key: an explicit `api_key` wins, then the `api_key_env`
/// variable.
///
/// Returns an `LlmError::AuthFailed` if neither source has a key.
pub fn resolve_api_key(config: &LlmConfig, provider: &str) -> Result<String, LlmError> {
    if let Some(key) = config.api_key.as_ref().filter(|k| !k.is_empty()) {
        return Ok(key.clone());
    }
    std::env::var(&config.api_key_env)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| LlmError::AuthFailed {
            provider: format!("{provider}: env var '{}' not set", config.api_key_env),
        })
}

/// True when the base URL points at this machine.
pub(crate) fn is_local_url(base_url: Option<&str>) -> bool {
    base_url
        .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
        .unwrap_or(false)
}

/// Build an HTTP client with the configured request timeout.
pub(crate) fn build_client(config: &LlmConfig) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| LlmError::Connection {
            message: format!("Failed to build HTTP client: {e}"),
        })
}

/// Map a transport-level failure to the matching `LlmError`.
pub(crate) fn map_transport_error(err: reqwest::Error, timeout_secs: u64) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout { timeout_secs }
    } else if err.is_connect() {
        LlmError::Connection {
            message: err.to_string(),
        }
    } else {
        LlmError::ApiRequest {
            message: format!("Request failed: {err}"),
        }
    }
}

/// Seconds to wait according to a `retry-after` header, if present.
pub(crate) fn retry_after_from_headers(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let value = headers
        .get("retry-after")
        .or_else(|| headers.get("x-ratelimit-reset-requests"))
        .and_then(|v| v.to_str().ok())?;

    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    // Fractional seconds, e.g. "0.5s" or "1.2"
    value
        .trim_end_matches('s')
        .parse::<f64>()
        .ok()
        .map(|secs| secs.ceil() as u64)
}

/// Map a non-success HTTP status to the matching `LlmError`.
///
/// `retry_hint` is a retry-after value taken from headers or the body.
pub(crate) fn map_http_error(
    provider: &str,
    status: reqwest::StatusCode,
    body: &str,
    retry_hint: Option<u64>,
) -> LlmError {
    match status.as_u16() {
        401 | 403 => {
            debug!(body = %body, status = status.as_u16(), "Authentication failed");
            LlmError::AuthFailed {
                provider: provider.to_string(),
            }
        }
        429 => LlmError::RateLimited {
            retry_after_secs: retry_hint.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        code if code >= 500 => LlmError::ServerError {
            status: code,
            message: body.to_string(),
        },
        code => LlmError::ApiRequest {
            message: format!("HTTP {code} from {provider}: {body}"),
        },
    }
}
