//! Criterion evaluator: scores one piece of code against one rubric criterion.
//!
//! Each evaluation runs a small state machine:
//!
//! ```text
//! Init ──► Validated ──► Calling(0) ──► Succeeded
//!  │           │            │  ▲
//!  │           │            ▼  │
//!  │           │         Retrying(n) ... Calling(n) ──► Failed
//!  ▼           ▼
//! ShortCircuited
//! ```
//!
//! Empty, placeholder and unparseable code never reaches the backend.
//! Transient backend faults and unparsable responses are retried with
//! exponential backoff; permanent faults stop at once. Every well-formed
//! request yields an [`EvaluationResult`]; only contract violations
//! (unsupported scale, empty criterion) return an error.
//!
//! Evaluations are plain futures: dropping one cancels the in-flight backend
//! call and any pending backoff.

use crate::backend::ScoringBackend;
use crate::config::{AutogradeConfig, RetryConfig};
use crate::confidence::ConfidenceSignals;
use crate::error::{EvaluationError, LlmError};
use crate::parser::{parse_score_detailed, split_response};
use crate::retry::{Sleeper, TokioSleeper, compute_backoff, failure_flag, is_retryable};
use crate::scale::ScaleCache;
use crate::types::{CriterionRequest, ErrorFlag, EvaluationResult};
use crate::validation::{SyntaxChecker, is_empty_code, is_placeholder};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationState {
    Init,
    Validated,
    ShortCircuited,
    Calling { attempt: u32 },
    Retrying { attempt: u32 },
    Succeeded,
    Failed,
}

impl EvaluationState {
    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(&self, next: &EvaluationState) -> bool {
        use EvaluationState::*;
        match (self, next) {
            (Init, Validated) | (Init, ShortCircuited) => true,
            (Validated, ShortCircuited) => true,
            (Validated, Calling { attempt }) => *attempt == 0,
            (Calling { .. }, Succeeded) | (Calling { .. }, Failed) => true,
            (Calling { attempt }, Retrying { attempt: next }) => *next == attempt + 1,
            (Retrying { attempt }, Calling { attempt: next }) => attempt == next,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EvaluationState::ShortCircuited | EvaluationState::Succeeded | EvaluationState::Failed
        )
    }
}

/// Tracks and traces state transitions for one evaluation.
struct StateTracker {
    state: EvaluationState,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            state: EvaluationState::Init,
        }
    }

    fn advance(&mut self, next: EvaluationState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "illegal evaluation transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(from = ?self.state, to = ?next, "Evaluation state transition");
        self.state = next;
    }
}

/// Why the last attempt did not produce a score.
enum AttemptFailure {
    Backend(LlmError),
    Unparsable { raw: String, confidence: f64 },
}

impl AttemptFailure {
    fn flag(&self) -> ErrorFlag {
        match self {
            AttemptFailure::Backend(err) => failure_flag(err),
            AttemptFailure::Unparsable { .. } => ErrorFlag::ParsingError,
        }
    }

    fn backend_error(&self) -> Option<&LlmError> {
        match self {
            AttemptFailure::Backend(err) => Some(err),
            AttemptFailure::Unparsable { .. } => None,
        }
    }
}

/// Scores criteria through a [`ScoringBackend`], with caching, retries and
/// bounded concurrency.
pub struct CriterionEvaluator {
    backend: Arc<dyn ScoringBackend>,
    scales: Arc<ScaleCache>,
    sleeper: Arc<dyn Sleeper>,
    syntax: SyntaxChecker,
    retry: RetryConfig,
    admission: Arc<Semaphore>,
    max_concurrency: usize,
    min_reasoning_chars: usize,
}

impl CriterionEvaluator {
    /// Create an evaluator with default retry policy, tokio sleeps and one
    /// backend call in flight at a time.
    pub fn new(backend: Arc<dyn ScoringBackend>, scales: Arc<ScaleCache>) -> Self {
        Self {
            backend,
            scales,
            sleeper: Arc::new(TokioSleeper),
            syntax: SyntaxChecker::new(),
            retry: RetryConfig::default(),
            admission: Arc::new(Semaphore::new(1)),
            max_concurrency: 1,
            min_reasoning_chars: 10,
        }
    }

    /// Create an evaluator from the retry and evaluation sections of `config`.
    pub fn from_config(
        backend: Arc<dyn ScoringBackend>,
        scales: Arc<ScaleCache>,
        config: &AutogradeConfig,
    ) -> Self {
        Self::new(backend, scales)
            .with_retry(config.retry.clone())
            .with_concurrency(config.evaluation.max_concurrency)
            .with_min_reasoning_chars(config.evaluation.min_reasoning_chars)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the delay capability used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Allow up to `limit` backend calls in flight at once (minimum 1).
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        let limit = limit.max(1);
        self.max_concurrency = limit;
        self.admission = Arc::new(Semaphore::new(limit));
        self
    }

    pub fn with_min_reasoning_chars(mut self, chars: usize) -> Self {
        self.min_reasoning_chars = chars;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn backend(&self) -> &dyn ScoringBackend {
        self.backend.as_ref()
    }

    /// Score one criterion.
    pub async fn evaluate(
        &self,
        request: &CriterionRequest,
    ) -> Result<EvaluationResult, EvaluationError> {
        let mut tracker = StateTracker::new();
        let criterion = preview(&request.criterion);

        if is_empty_code(&request.code) {
            tracker.advance(EvaluationState::ShortCircuited);
            return Ok(self.finish_short_circuit(&criterion, ErrorFlag::EmptyCode));
        }

        if request.criterion.trim().is_empty() {
            return Err(EvaluationError::EmptyCriterion);
        }
        let scale = self.scales.get(request.max_points)?;
        tracker.advance(EvaluationState::Validated);

        if is_placeholder(&request.code) {
            tracker.advance(EvaluationState::ShortCircuited);
            return Ok(self.finish_short_circuit(&criterion, ErrorFlag::PlaceholderCode));
        }
        if self.syntax.has_syntax_error(&request.code) {
            tracker.advance(EvaluationState::ShortCircuited);
            return Ok(self.finish_short_circuit(&criterion, ErrorFlag::SyntaxError));
        }

        let prompt = scale.render(request);
        let max_attempts = self.retry.max_retries.saturating_add(1);
        let mut last_failure: Option<AttemptFailure> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = compute_backoff(
                    &self.retry,
                    attempt - 1,
                    last_failure.as_ref().and_then(|f| f.backend_error()),
                );
                tracker.advance(EvaluationState::Retrying { attempt });
                warn!(
                    criterion = %criterion,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retrying criterion"
                );
                self.sleeper.sleep(delay).await;
            }

            tracker.advance(EvaluationState::Calling { attempt });
            debug!(
                criterion = %criterion,
                attempt = attempt + 1,
                max_attempts,
                backend = self.backend.name(),
                model = self.backend.model_name(),
                "Requesting criterion score"
            );

            let outcome = {
                // The semaphore is never closed, so a failed acquire cannot happen.
                let _permit = self.admission.acquire().await.ok();
                self.backend.generate(&prompt).await
            };

            match outcome {
                Ok(raw) => match self.read_score(&raw, request.max_points) {
                    Ok((score, confidence)) => {
                        tracker.advance(EvaluationState::Succeeded);
                        let result = EvaluationResult {
                            score,
                            confidence,
                            raw_response: raw,
                            error_flag: None,
                            retry_count: attempt,
                        };
                        self.log_result(&criterion, &result);
                        return Ok(result);
                    }
                    Err(confidence) => {
                        warn!(
                            criterion = %criterion,
                            attempt = attempt + 1,
                            max_attempts,
                            outcome = "unparsable",
                            "Response contained no numeric score"
                        );
                        last_failure = Some(AttemptFailure::Unparsable { raw, confidence });
                    }
                },
                Err(err) if is_retryable(&err) => {
                    warn!(
                        criterion = %criterion,
                        attempt = attempt + 1,
                        max_attempts,
                        outcome = "transient",
                        error = %err,
                        "Transient backend failure"
                    );
                    last_failure = Some(AttemptFailure::Backend(err));
                }
                Err(err) => {
                    tracker.advance(EvaluationState::Failed);
                    error!(
                        criterion = %criterion,
                        attempt = attempt + 1,
                        outcome = "permanent",
                        error = %err,
                        "Permanent backend failure, not retrying"
                    );
                    let result = EvaluationResult::failed(ErrorFlag::ApiError, attempt, "", 0.0);
                    self.log_result(&criterion, &result);
                    return Ok(result);
                }
            }
        }

        tracker.advance(EvaluationState::Failed);
        let retry_count = max_attempts - 1;
        let result = match last_failure {
            Some(AttemptFailure::Unparsable { raw, confidence }) => {
                EvaluationResult::failed(ErrorFlag::ParsingError, retry_count, raw, confidence)
            }
            Some(failure) => EvaluationResult::failed(failure.flag(), retry_count, "", 0.0),
            None => EvaluationResult::failed(ErrorFlag::ApiError, retry_count, "", 0.0),
        };
        error!(
            criterion = %criterion,
            attempts = max_attempts,
            error_flag = ?result.error_flag,
            "Retries exhausted"
        );
        self.log_result(&criterion, &result);
        Ok(result)
    }

    /// Score several criteria against the same code, keyed by criterion text.
    ///
    /// Every criterion is validated before any backend call. A failure in one
    /// evaluation never affects the others. Duplicate criterion texts keep
    /// the last result.
    pub async fn evaluate_multiple(
        &self,
        code: &str,
        task_description: &str,
        criteria: &[(String, u32)],
    ) -> Result<HashMap<String, EvaluationResult>, EvaluationError> {
        let requests: Vec<CriterionRequest> = criteria
            .iter()
            .map(|(criterion, max_points)| {
                CriterionRequest::new(code, task_description, criterion.clone(), *max_points)
            })
            .collect();

        if !is_empty_code(code) {
            for request in &requests {
                if request.criterion.trim().is_empty() {
                    return Err(EvaluationError::EmptyCriterion);
                }
                self.scales.get(request.max_points)?;
            }
        }

        let results = self.evaluate_batch(&requests).await;
        let mut by_criterion = HashMap::with_capacity(requests.len());
        for (request, result) in requests.into_iter().zip(results) {
            by_criterion.insert(request.criterion, result?);
        }
        Ok(by_criterion)
    }

    /// Evaluate requests with up to `max_concurrency` in flight, keeping
    /// input order in the output.
    pub async fn evaluate_batch(
        &self,
        requests: &[CriterionRequest],
    ) -> Vec<Result<EvaluationResult, EvaluationError>> {
        futures::stream::iter(requests.iter().map(|r| self.evaluate(r)))
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    /// Split, parse and weigh a response. `Err` carries the confidence of a
    /// response that held no number.
    fn read_score(&self, raw: &str, max_points: u32) -> Result<(u32, f64), f64> {
        let shape = split_response(raw);
        let mut signals = ConfidenceSignals::from_shape(&shape, self.min_reasoning_chars);

        let parsed = parse_score_detailed(&shape.score_field, max_points).or_else(|_| {
            signals.heuristic = true;
            parse_score_detailed(raw, max_points)
        });

        match parsed {
            Ok(parsed) => {
                signals.clamped = parsed.clamped;
                Ok((parsed.value, signals.confidence()))
            }
            Err(_) => {
                signals.non_numeric = true;
                signals.heuristic = false;
                Err(signals.confidence())
            }
        }
    }

    fn finish_short_circuit(&self, criterion: &str, flag: ErrorFlag) -> EvaluationResult {
        let result = EvaluationResult::short_circuit(flag);
        self.log_result(criterion, &result);
        result
    }

    fn log_result(&self, criterion: &str, result: &EvaluationResult) {
        info!(
            criterion = %criterion,
            score = result.score,
            confidence = result.confidence,
            retry_count = result.retry_count,
            error_flag = result.error_flag.map(|f| f.as_str()).unwrap_or("none"),
            "Criterion evaluated"
        );
    }
}

/// First line of a criterion, shortened for log fields.
fn preview(criterion: &str) -> String {
    let first_line = criterion.trim().lines().next().unwrap_or_default();
    if first_line.chars().count() > 60 {
        let cut: String = first_line.chars().take(57).collect();
        format!("{cut}...")
    } else {
        first_line.to_string()
    }
}
