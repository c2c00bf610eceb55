//! Error types for the Autograde core.
//!
//! Uses `thiserror` for public API error types. Expected marking outcomes
//! (unparsable responses, exhausted retries, placeholder code) are not errors:
//! they travel as flagged [`EvaluationResult`](crate::types::EvaluationResult)s.
//! The enums below cover backend faults, caller contract violations and I/O
//! around notebooks, rubrics, reports and configuration.

use std::path::PathBuf;

/// Top-level error type for the Autograde core library.
#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Notebook error: {0}")]
    Notebook(#[from] NotebookError),

    #[error("Rubric error: {0}")]
    Rubric(#[from] RubricError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from scoring backend interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("Provider returned server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Caller contract violations detected by the criterion evaluator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    #[error("Unsupported scale: max_points must be one of 1, 2, 3, 4, 6, 10 (got {max_points})")]
    UnsupportedScale { max_points: u32 },

    #[error("Criterion text must not be empty")]
    EmptyCriterion,
}

/// Errors from loading a student notebook.
#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    #[error("Notebook not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Notebook is not valid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Notebook has no cell list")]
    MissingCells,

    #[error("Failed to read notebook {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from loading a rubric CSV.
#[derive(Debug, thiserror::Error)]
pub enum RubricError {
    #[error("Rubric not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Rubric CSV error: {message}")]
    Csv { message: String },

    #[error("Rubric contains no criteria")]
    Empty,

    #[error("Failed to read rubric {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from writing mark sheets.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Spreadsheet error: {message}")]
    Spreadsheet { message: String },

    #[error("Failed to write report {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::ParseError {
            message: err.to_string(),
        }
    }
}

impl From<rust_xlsxwriter::XlsxError> for ReportError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        ReportError::Spreadsheet {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for RubricError {
    fn from(err: csv::Error) -> Self {
        RubricError::Csv {
            message: err.to_string(),
        }
    }
}

/// A type alias for results using the top-level `GradeError`.
pub type Result<T> = std::result::Result<T, GradeError>;
