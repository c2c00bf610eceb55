//! # Autograde Core
//!
//! Core library for marking Jupyter notebook assignments with an LLM.
//! Provides notebook and rubric loading, the per-criterion evaluator with
//! its score parser, scale cache and retry policy, scoring backends,
//! assignment orchestration, mark sheet rendering and configuration.

pub mod backend;
pub mod confidence;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod marker;
pub mod notebook;
pub mod parser;
pub mod providers;
pub mod report;
pub mod retry;
pub mod rubric;
pub mod scale;
pub mod types;
pub mod validation;

// Re-export commonly used types at the crate root.
pub use backend::{MockBackend, ScoringBackend, ScoringPrompt};
pub use config::{AutogradeConfig, LlmConfig, RetryConfig, load_config};
pub use error::{
    ConfigError, EvaluationError, GradeError, LlmError, NotebookError, ReportError, Result,
    RubricError,
};
pub use evaluator::CriterionEvaluator;
pub use marker::{AssignmentMarker, MarkFlag, MarkingResult, MarkingStats, MarkingStatus};
pub use notebook::{NotebookParser, ParsedNotebook};
pub use parser::{ScoreParseError, parse_score};
pub use providers::create_backend;
pub use report::{MarkSheet, ReportPaths, write_reports};
pub use retry::{RecordingSleeper, Sleeper, TokioSleeper};
pub use rubric::{Criterion, Rubric, load_rubric};
pub use scale::{SUPPORTED_SCALES, ScaleCache};
pub use types::{CriterionRequest, ErrorFlag, EvaluationResult};
