//! Core type definitions for criterion evaluation.
//!
//! Defines the request handed to the evaluator, the result it always returns
//! and the closed set of flags that explain a zero or low-confidence score.

use serde::{Deserialize, Serialize};

/// Why an evaluation could not produce a trustworthy score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorFlag {
    /// Code was empty after trimming.
    EmptyCode,
    /// Code is only stub/template content.
    PlaceholderCode,
    /// Code does not parse as Python.
    SyntaxError,
    /// No numeric score could be read from the backend response.
    ParsingError,
    /// The backend failed permanently or kept failing transiently.
    ApiError,
    /// The backend kept timing out, or the marking deadline passed.
    TimeoutError,
}

impl ErrorFlag {
    /// Wire name of the flag, as it appears in issues and mark sheets.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorFlag::EmptyCode => "EMPTY_CODE",
            ErrorFlag::PlaceholderCode => "PLACEHOLDER_CODE",
            ErrorFlag::SyntaxError => "SYNTAX_ERROR",
            ErrorFlag::ParsingError => "PARSING_ERROR",
            ErrorFlag::ApiError => "API_ERROR",
            ErrorFlag::TimeoutError => "TIMEOUT_ERROR",
        }
    }

    /// Flags raised before any backend call is made.
    pub fn is_precheck(&self) -> bool {
        matches!(
            self,
            ErrorFlag::EmptyCode | ErrorFlag::PlaceholderCode | ErrorFlag::SyntaxError
        )
    }

    /// Flags that indicate the score is unreliable and a human should look.
    pub fn needs_manual_review(&self) -> bool {
        matches!(
            self,
            ErrorFlag::ParsingError | ErrorFlag::ApiError | ErrorFlag::TimeoutError
        )
    }
}

impl std::fmt::Display for ErrorFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One criterion to be scored against one piece of student code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionRequest {
    pub code: String,
    pub task_description: String,
    pub criterion: String,
    pub max_points: u32,
}

impl CriterionRequest {
    pub fn new(
        code: impl Into<String>,
        task_description: impl Into<String>,
        criterion: impl Into<String>,
        max_points: u32,
    ) -> Self {
        Self {
            code: code.into(),
            task_description: task_description.into(),
            criterion: criterion.into(),
            max_points,
        }
    }
}

/// Outcome of scoring one criterion. Always produced for a well-formed
/// request, whether or not the backend cooperated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Integer score in `0..=max_points`.
    pub score: u32,
    /// Trust in the score, in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Unmodified text of the last backend response, empty if none was received.
    pub raw_response: String,
    pub error_flag: Option<ErrorFlag>,
    /// Retries consumed; zero when the first attempt settled the result.
    pub retry_count: u32,
}

impl EvaluationResult {
    /// Result for a request rejected by a pre-call check. The verdict is
    /// certain, so confidence is full.
    pub fn short_circuit(flag: ErrorFlag) -> Self {
        Self {
            score: 0,
            confidence: 1.0,
            raw_response: String::new(),
            error_flag: Some(flag),
            retry_count: 0,
        }
    }

    /// Result for an evaluation that reached the backend but never produced
    /// a usable score.
    pub fn failed(
        flag: ErrorFlag,
        retry_count: u32,
        raw_response: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            score: 0,
            confidence: confidence.clamp(0.0, 1.0),
            raw_response: raw_response.into(),
            error_flag: Some(flag),
            retry_count,
        }
    }

    /// True when a score was read from the backend without any flag.
    pub fn is_success(&self) -> bool {
        self.error_flag.is_none()
    }

    /// True when the evaluation made at least one backend call.
    pub fn reached_backend(&self) -> bool {
        !self.error_flag.is_some_and(|f| f.is_precheck())
    }
}
