//! Assignment marking: runs every rubric criterion against a student's
//! notebook and collects marks, issues and a status.

use crate::config::AutogradeConfig;
use crate::error::{EvaluationError, GradeError};
use crate::evaluator::CriterionEvaluator;
use crate::notebook::{NotebookParser, ParsedNotebook};
use crate::rubric::{Criterion, Rubric, load_rubric, sum_points};
use crate::types::{CriterionRequest, ErrorFlag, EvaluationResult};
use futures::StreamExt;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Flag attached to a mark that does not count toward the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkFlag {
    /// The notebook has no code for the task.
    MissingTask,
    Evaluation(ErrorFlag),
}

impl MarkFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkFlag::MissingTask => "MISSING_TASK",
            MarkFlag::Evaluation(flag) => flag.as_str(),
        }
    }

    pub fn needs_manual_review(&self) -> bool {
        match self {
            MarkFlag::MissingTask => false,
            MarkFlag::Evaluation(flag) => flag.needs_manual_review(),
        }
    }
}

impl std::fmt::Display for MarkFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MarkFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Mark for one criterion of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionMark {
    /// One-based position of the criterion within its task.
    pub criterion_index: usize,
    pub criterion: String,
    pub max_points: u32,
    pub score: u32,
    pub confidence: f64,
    pub error_flag: Option<MarkFlag>,
    pub raw_response: String,
    pub retry_count: u32,
}

impl CriterionMark {
    fn from_result(index: usize, criterion: &Criterion, result: EvaluationResult) -> Self {
        Self {
            criterion_index: index,
            criterion: criterion.text.clone(),
            max_points: criterion.max_points,
            score: result.score,
            confidence: result.confidence,
            error_flag: result.error_flag.map(MarkFlag::Evaluation),
            raw_response: result.raw_response,
            retry_count: result.retry_count,
        }
    }

    fn missing(index: usize, criterion: &Criterion) -> Self {
        Self {
            criterion_index: index,
            criterion: criterion.text.clone(),
            max_points: criterion.max_points,
            score: 0,
            confidence: 1.0,
            error_flag: Some(MarkFlag::MissingTask),
            raw_response: "Task not found".to_string(),
            retry_count: 0,
        }
    }

    /// A criterion abandoned at the marking deadline. No backend result
    /// exists for it, so it carries no retry count.
    fn abandoned(index: usize, criterion: &Criterion) -> Self {
        Self {
            criterion_index: index,
            criterion: criterion.text.clone(),
            max_points: criterion.max_points,
            score: 0,
            confidence: 0.0,
            error_flag: Some(MarkFlag::Evaluation(ErrorFlag::TimeoutError)),
            raw_response: "Marking deadline passed".to_string(),
            retry_count: 0,
        }
    }

    /// Whether the score counts toward totals.
    pub fn counts(&self) -> bool {
        self.error_flag.is_none()
    }
}

/// Marks for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskResult {
    pub task_number: u32,
    pub code: String,
    pub marks: Vec<CriterionMark>,
    pub total_score: u32,
    pub max_points: u32,
    pub issues: Vec<String>,
    pub missing: bool,
}

/// Overall outcome of marking one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkingStatus {
    NoTasksProcessed,
    ZeroScore,
    CompletedWithIssues,
    Completed,
}

impl MarkingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkingStatus::NoTasksProcessed => "Failed - No Tasks Processed",
            MarkingStatus::ZeroScore => "Completed - Zero Score",
            MarkingStatus::CompletedWithIssues => "Completed with Issues",
            MarkingStatus::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for MarkingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MarkingStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Complete marking result for one student.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkingResult {
    pub student_id: String,
    pub total_score: u32,
    pub max_points: u32,
    pub tasks: BTreeMap<u32, TaskResult>,
    pub issues: Vec<String>,
    #[serde(serialize_with = "serialize_secs")]
    pub processing_time: Duration,
    pub status: MarkingStatus,
}

impl MarkingResult {
    /// Score as a percentage of the available points.
    pub fn percentage(&self) -> f64 {
        if self.max_points == 0 {
            0.0
        } else {
            f64::from(self.total_score) * 100.0 / f64::from(self.max_points)
        }
    }

    /// Issues whose flag means a human should check the mark.
    pub fn manual_review_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| needs_manual_review(issue))
            .count()
    }
}

/// True when an issue line carries a flag that needs a human look.
pub fn needs_manual_review(issue: &str) -> bool {
    [
        ErrorFlag::ParsingError,
        ErrorFlag::ApiError,
        ErrorFlag::TimeoutError,
    ]
    .iter()
    .any(|flag| issue.contains(flag.as_str()))
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Running totals across every student marked by one marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarkingStats {
    pub assignments_processed: usize,
    pub backend_calls: u64,
    pub errors: u64,
    #[serde(serialize_with = "serialize_secs")]
    pub processing_time: Duration,
}

impl MarkingStats {
    pub fn average_processing_time(&self) -> Duration {
        match u32::try_from(self.assignments_processed) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.processing_time / n,
        }
    }

    /// Errors per backend call.
    pub fn error_rate(&self) -> f64 {
        self.errors as f64 / self.backend_calls.max(1) as f64
    }
}

/// Tallies for one task, folded into [`MarkingStats`].
#[derive(Debug, Default)]
struct TaskTally {
    backend_calls: u64,
    errors: u64,
}

/// Marks whole assignments with a [`CriterionEvaluator`].
pub struct AssignmentMarker {
    evaluator: CriterionEvaluator,
    notebooks: NotebookParser,
    student_timeout: Option<Duration>,
    issue_threshold: usize,
    output_dir: PathBuf,
    stats: MarkingStats,
}

impl AssignmentMarker {
    pub fn new(evaluator: CriterionEvaluator) -> Self {
        Self::from_config(evaluator, &AutogradeConfig::default())
    }

    /// A `student_timeout_secs` of zero disables the per-student deadline.
    pub fn from_config(evaluator: CriterionEvaluator, config: &AutogradeConfig) -> Self {
        let timeout = config.marking.student_timeout();
        Self {
            evaluator,
            notebooks: NotebookParser::from_config(&config.marking),
            student_timeout: (!timeout.is_zero()).then_some(timeout),
            issue_threshold: config.marking.issue_threshold,
            output_dir: config.output.dir.clone(),
            stats: MarkingStats::default(),
        }
    }

    pub fn with_student_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.student_timeout = timeout;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn evaluator(&self) -> &CriterionEvaluator {
        &self.evaluator
    }

    pub fn statistics(&self) -> &MarkingStats {
        &self.stats
    }

    /// Load the notebook and rubric from disk, then mark.
    pub async fn mark_files(
        &mut self,
        student_id: &str,
        notebook_path: &Path,
        rubric_path: &Path,
    ) -> Result<MarkingResult, GradeError> {
        info!(student = student_id, notebook = %notebook_path.display(), "Loading submission");
        let notebook = self.notebooks.parse_file(notebook_path)?;
        let rubric = load_rubric(rubric_path)?;
        Ok(self.mark_assignment(student_id, &notebook, &rubric).await)
    }

    /// Mark every rubric task against the notebook's code.
    pub async fn mark_assignment(
        &mut self,
        student_id: &str,
        notebook: &ParsedNotebook,
        rubric: &Rubric,
    ) -> MarkingResult {
        let started = Instant::now();
        let deadline = self.student_timeout.map(|t| started + t);
        info!(
            student = student_id,
            tasks = rubric.tasks.len(),
            criteria = rubric.criterion_count(),
            "Marking assignment"
        );

        let mut tasks = BTreeMap::new();
        let mut issues: Vec<String> = notebook.issues.clone();
        issues.extend(rubric.issues.iter().cloned());
        let mut tally = TaskTally::default();

        for (&task_number, criteria) in &rubric.tasks {
            let code = notebook.code(task_number).unwrap_or_default();
            let (task, task_tally) = self.mark_task(task_number, code, criteria, deadline).await;
            tally.backend_calls += task_tally.backend_calls;
            tally.errors += task_tally.errors;
            issues.extend(task.issues.iter().cloned());
            tasks.insert(task_number, task);
        }

        dedup_preserving_order(&mut issues);
        let total_score = sum_points(tasks.values().map(|t| t.total_score));
        let max_points = rubric.total_max_points();

        let status = if tasks.is_empty() {
            MarkingStatus::NoTasksProcessed
        } else if total_score == 0 {
            MarkingStatus::ZeroScore
        } else if issues.len() > self.issue_threshold {
            MarkingStatus::CompletedWithIssues
        } else {
            MarkingStatus::Completed
        };

        let processing_time = started.elapsed();
        self.stats.assignments_processed += 1;
        self.stats.backend_calls += tally.backend_calls;
        self.stats.errors += tally.errors;
        self.stats.processing_time += processing_time;

        info!(
            student = student_id,
            score = total_score,
            max_points,
            issues = issues.len(),
            status = %status,
            elapsed_ms = processing_time.as_millis() as u64,
            "Marking completed"
        );

        MarkingResult {
            student_id: student_id.to_string(),
            total_score,
            max_points,
            tasks,
            issues,
            processing_time,
            status,
        }
    }

    async fn mark_task(
        &self,
        task_number: u32,
        code: &str,
        criteria: &[Criterion],
        deadline: Option<Instant>,
    ) -> (TaskResult, TaskTally) {
        let mut task = TaskResult {
            task_number,
            code: code.to_string(),
            max_points: sum_points(criteria.iter().map(|c| c.max_points)),
            ..TaskResult::default()
        };
        let mut tally = TaskTally::default();

        if code.trim().is_empty() {
            warn!(task = task_number, "Task has no code");
            task.missing = true;
            task.issues.push(format!("Task {task_number}: MISSING_TASK"));
            task.marks = criteria
                .iter()
                .enumerate()
                .map(|(i, c)| CriterionMark::missing(i + 1, c))
                .collect();
            return (task, tally);
        }

        let description = format!("Programming task {task_number} from student assignment");
        let requests: Vec<CriterionRequest> = criteria
            .iter()
            .map(|c| CriterionRequest::new(code, description.as_str(), c.text.as_str(), c.max_points))
            .collect();
        info!(task = task_number, criteria = requests.len(), "Evaluating task");

        let evaluator = &self.evaluator;
        let outcomes: Vec<Option<Result<EvaluationResult, EvaluationError>>> =
            futures::stream::iter(requests.iter().map(|r| evaluate_before(evaluator, r, deadline)))
                .buffered(evaluator.max_concurrency())
                .collect()
                .await;

        for (i, (criterion, outcome)) in criteria.iter().zip(outcomes).enumerate() {
            let index = i + 1;
            let mut issue = None;
            let mark = match outcome {
                Some(Ok(result)) => {
                    if result.reached_backend() {
                        tally.backend_calls += u64::from(result.retry_count) + 1;
                    }
                    if result.error_flag.is_some_and(|f| f.needs_manual_review()) {
                        tally.errors += 1;
                    }
                    CriterionMark::from_result(index, criterion, result)
                }
                Some(Err(err)) => {
                    error!(
                        task = task_number,
                        criterion_index = index,
                        error = %err,
                        "Criterion could not be evaluated"
                    );
                    tally.errors += 1;
                    issue = Some(format!(
                        "Task {task_number} Criterion {index}: PARSING_ERROR - {err}"
                    ));
                    let mut mark = CriterionMark::from_result(
                        index,
                        criterion,
                        EvaluationResult::failed(ErrorFlag::ParsingError, 0, "", 0.0),
                    );
                    mark.raw_response = format!("Evaluation failed: {err}");
                    mark
                }
                // Abandoned at the deadline: an error, but never a counted call.
                None => {
                    warn!(task = task_number, criterion_index = index, "Marking deadline passed");
                    tally.errors += 1;
                    CriterionMark::abandoned(index, criterion)
                }
            };

            debug!(
                task = task_number,
                criterion_index = index,
                score = mark.score,
                max_points = mark.max_points,
                "Criterion marked"
            );
            if let Some(flag) = mark.error_flag {
                task.issues.push(
                    issue.unwrap_or_else(|| format!("Task {task_number} Criterion {index}: {flag}")),
                );
            }
            task.marks.push(mark);
        }

        task.total_score = sum_points(task.marks.iter().filter(|m| m.counts()).map(|m| m.score));
        info!(
            task = task_number,
            score = task.total_score,
            max_points = task.max_points,
            "Task completed"
        );
        (task, tally)
    }

    /// Check files, loaders and the output directory without calling the
    /// backend. Returns human-readable problems; empty means ready.
    pub fn validate_setup(&self, notebook_path: &Path, rubric_path: &Path) -> Vec<String> {
        let mut issues = Vec::new();
        if !notebook_path.exists() {
            issues.push(format!("Notebook file not found: {}", notebook_path.display()));
        }
        if !rubric_path.exists() {
            issues.push(format!("Rubric file not found: {}", rubric_path.display()));
        }
        if !issues.is_empty() {
            return issues;
        }

        if let Err(e) = self.notebooks.parse_file(notebook_path) {
            issues.push(format!("Notebook parsing failed: {e}"));
        }
        if let Err(e) = load_rubric(rubric_path) {
            issues.push(format!("Rubric parsing failed: {e}"));
        }
        if let Err(e) = std::fs::create_dir_all(&self.output_dir) {
            issues.push(format!(
                "Cannot create output directory {}: {e}",
                self.output_dir.display()
            ));
        }
        issues
    }
}

/// Run one evaluation unless the deadline has passed or passes mid-flight.
/// `None` means the deadline won.
async fn evaluate_before(
    evaluator: &CriterionEvaluator,
    request: &CriterionRequest,
    deadline: Option<Instant>,
) -> Option<Result<EvaluationResult, EvaluationError>> {
    match deadline {
        None => Some(evaluator.evaluate(request).await),
        Some(deadline) if Instant::now() >= deadline => None,
        Some(deadline) => tokio::time::timeout_at(deadline, evaluator.evaluate(request))
            .await
            .ok(),
    }
}

fn dedup_preserving_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}
