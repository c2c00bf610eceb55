//! Configuration system for Autograde.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit config file -> environment. Command-line
//! overrides are applied by the caller on the extracted value.
//! Configuration is loaded from `~/.config/autograde/config.toml` and/or
//! `.autograde/config.toml` in the workspace directory.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutogradeConfig {
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub evaluation: EvaluationConfig,
    pub marking: MarkingConfig,
    pub output: OutputConfig,
}

/// Scoring backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai", "anthropic", or anything OpenAI-compatible.
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o-mini").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// API key given directly; takes precedence over `api_key_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    pub max_tokens: usize,
    /// Sampling temperature. Marking wants repeatable answers, so 0.0.
    pub temperature: f32,
    /// Per-request transport timeout.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 1000,
            temperature: 0.0,
            request_timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Validate the configuration and return a list of warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !(0.0..=2.0).contains(&self.temperature) {
            warnings.push(format!(
                "llm.temperature is {}: providers accept 0.0 to 2.0",
                self.temperature
            ));
        }
        if self.temperature > 0.0 {
            warnings.push("llm.temperature above 0.0 makes marks less repeatable".to_string());
        }
        if self.max_tokens == 0 {
            warnings.push("llm.max_tokens is 0: responses will be empty".to_string());
        }
        if self.request_timeout_secs == 0 {
            warnings.push("llm.request_timeout_secs is 0: every request will time out".to_string());
        }
        warnings
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Retry policy for transient backend failures and unparsable responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Criterion evaluator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Backend calls allowed in flight at once across all evaluations.
    pub max_concurrency: usize,
    /// Reasoning shorter than this counts as missing.
    pub min_reasoning_chars: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            min_reasoning_chars: 10,
        }
    }
}

/// Assignment marking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkingConfig {
    /// Number given to the first solution found in a notebook.
    pub first_task_number: u32,
    /// How many tasks a complete notebook contains.
    pub expected_task_count: u32,
    /// Deadline for marking one student, across all criteria.
    pub student_timeout_secs: u64,
    /// More issues than this marks a result "Completed with Issues".
    pub issue_threshold: usize,
}

impl Default for MarkingConfig {
    fn default() -> Self {
        Self {
            first_task_number: 2,
            expected_task_count: 6,
            student_timeout_secs: 300,
            issue_threshold: 2,
        }
    }
}

impl MarkingConfig {
    pub fn student_timeout(&self) -> Duration {
        Duration::from_secs(self.student_timeout_secs)
    }
}

/// Where and how reports are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Also write the full result as JSON next to the spreadsheet.
    pub write_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("marking_output"),
            write_json: true,
        }
    }
}

impl AutogradeConfig {
    /// Validate the whole configuration and return a list of warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();

        if self.evaluation.max_concurrency == 0 {
            warnings.push(
                "evaluation.max_concurrency is 0: treated as 1 so marking can make progress"
                    .to_string(),
            );
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            warnings.push(format!(
                "retry.max_backoff_ms ({}) is below retry.initial_backoff_ms ({}): every delay will be capped",
                self.retry.max_backoff_ms, self.retry.initial_backoff_ms
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            warnings.push(format!(
                "retry.backoff_multiplier is {}: delays will shrink between retries",
                self.retry.backoff_multiplier
            ));
        }
        if self.marking.expected_task_count == 0 {
            warnings.push("marking.expected_task_count is 0: no task will be reported missing".to_string());
        }

        warnings
    }
}

/// Load configuration from the default file locations and environment.
///
/// `workspace` adds `<workspace>/.autograde/config.toml`; `explicit` adds a
/// file named on the command line, which must exist. Environment variables
/// use the `AUTOGRADE_` prefix with `__` for nesting
/// (`AUTOGRADE_LLM__MODEL=gpt-4o`).
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<AutogradeConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(AutogradeConfig::default()));

    // User-level config
    if let Some(dirs) = directories::ProjectDirs::from("dev", "autograde", "autograde") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".autograde").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("AUTOGRADE_").split("__"));

    Ok(figment.extract()?)
}

/// Directory for rolling log files, if the platform has one.
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "autograde", "autograde")
        .map(|dirs| dirs.data_local_dir().join("logs"))
}
