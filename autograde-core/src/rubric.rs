//! Rubric loading from a header-less four-column CSV:
//! `task, criterion, score, max_points`.
//!
//! A `Task N` label opens a task; following rows without a label belong to
//! it. Subtotal rows, blank rows and rows without an integer max_points
//! (header rows, notes) are skipped.

use crate::error::RubricError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static TASK_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)task\s+(\d+)").expect("task label regex is valid"));

/// One marking criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub text: String,
    pub max_points: u32,
    /// Zero-based CSV row the criterion came from.
    pub row: usize,
}

/// Criteria grouped by task number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rubric {
    pub tasks: BTreeMap<u32, Vec<Criterion>>,
    pub issues: Vec<String>,
}

impl Rubric {
    pub fn criteria(&self, task_number: u32) -> &[Criterion] {
        self.tasks
            .get(&task_number)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn task_max_points(&self, task_number: u32) -> u32 {
        sum_points(self.criteria(task_number).iter().map(|c| c.max_points))
    }

    pub fn total_max_points(&self) -> u32 {
        sum_points(self.tasks.keys().map(|t| self.task_max_points(*t)))
    }

    pub fn criterion_count(&self) -> usize {
        self.tasks.values().map(Vec::len).sum()
    }
}

/// Read and parse a rubric file.
pub fn load_rubric(path: &Path) -> Result<Rubric, RubricError> {
    if !path.exists() {
        return Err(RubricError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let bytes = std::fs::read(path).map_err(|source| RubricError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_rubric(&bytes)
}

/// Parse rubric CSV bytes. A leading UTF-8 byte order mark is ignored.
pub fn parse_rubric(bytes: &[u8]) -> Result<Rubric, RubricError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut rubric = Rubric::default();
    let mut current_task: Option<u32> = None;

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let task_cell = record.get(0).unwrap_or_default();
        let criterion = record.get(1).unwrap_or_default();
        let max_points_cell = record.get(3).unwrap_or_default();

        if task_cell.is_empty() && criterion.is_empty() && max_points_cell.is_empty() {
            continue;
        }
        if criterion.to_uppercase().contains("SUBTOTAL") {
            continue;
        }

        if let Some(task) = task_number(task_cell) {
            current_task = Some(task);
            rubric.tasks.entry(task).or_default();
            debug!(task, "Found task label");
        }

        let Some(max_points) = parse_max_points(max_points_cell) else {
            continue;
        };
        if criterion.is_empty() {
            continue;
        }

        let Some(task) = current_task else {
            let issue = format!("Found criterion without task context at row {row}: {criterion}");
            warn!("{issue}");
            rubric.issues.push(issue);
            continue;
        };

        rubric.tasks.entry(task).or_default().push(Criterion {
            text: criterion.to_string(),
            max_points,
            row,
        });
    }

    if rubric.criterion_count() == 0 {
        return Err(RubricError::Empty);
    }

    info!(
        tasks = rubric.tasks.len(),
        criteria = rubric.criterion_count(),
        total_points = rubric.total_max_points(),
        "Parsed rubric"
    );
    Ok(rubric)
}

fn task_number(cell: &str) -> Option<u32> {
    TASK_LABEL
        .captures(cell)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Accepts `4`, `4.0` and `4.5` (truncated); rejects text and negatives.
/// Sum point values, saturating at `u32::MAX`.
pub(crate) fn sum_points(points: impl IntoIterator<Item = u32>) -> u32 {
    points.into_iter().fold(0, u32::saturating_add)
}

fn parse_max_points(cell: &str) -> Option<u32> {
    let value: f64 = cell.parse().ok()?;
    if value.is_finite() && value >= 0.0 && value <= f64::from(u32::MAX) {
        Some(value as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RUBRIC: &str = "\
Task Name,Criterion Description,Student Score,Max Points
Task 2 - Whisper bot,Returns lowercase text,,2
,Handles empty input,,2
,SUBTOTAL,,4
,,,
Task 3,Multiplies two numbers,,4.0
,Prints the result,,6
";

    #[test]
    fn test_parses_tasks_and_carries_task_forward() {
        let rubric = parse_rubric(RUBRIC.as_bytes()).unwrap();
        assert_eq!(rubric.tasks.len(), 2);
        let task2 = rubric.criteria(2);
        assert_eq!(task2.len(), 2);
        assert_eq!(task2[0].text, "Returns lowercase text");
        assert_eq!(task2[1].text, "Handles empty input");
        assert_eq!(task2[1].row, 2);
        assert_eq!(rubric.criteria(3)[0].max_points, 4);
        assert_eq!(rubric.task_max_points(3), 10);
        assert_eq!(rubric.total_max_points(), 14);
        assert!(rubric.issues.is_empty());
    }

    #[test]
    fn test_bom_is_ignored() {
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(b"Task 4,Uses a loop,,3\n");
        let rubric = parse_rubric(&bytes).unwrap();
        assert_eq!(rubric.criteria(4)[0].text, "Uses a loop");
    }

    #[test]
    fn test_criterion_without_task_is_an_issue() {
        let rubric = parse_rubric(b",Orphan criterion,,2\nTask 2,Real one,,1\n").unwrap();
        assert_eq!(rubric.criterion_count(), 1);
        assert_eq!(rubric.issues.len(), 1);
        assert!(rubric.issues[0].contains("Orphan criterion"));
    }

    #[test]
    fn test_ragged_rows_are_tolerated() {
        let rubric = parse_rubric(b"Task 5,Short row\nTask 5,Full row,,2,extra\n").unwrap();
        assert_eq!(rubric.criteria(5).len(), 1);
        assert_eq!(rubric.criteria(5)[0].text, "Full row");
    }

    #[test]
    fn test_rubric_without_criteria_is_an_error() {
        assert!(matches!(parse_rubric(b""), Err(RubricError::Empty)));
        assert!(matches!(
            parse_rubric(b"Task Name,Criterion,Score,Max Points
"),
            Err(RubricError::Empty)
        ));
    }

    #[test]
    fn test_parse_max_points() {
        assert_eq!(parse_max_points("3"), Some(3));
        assert_eq!(parse_max_points("2.9"), Some(2));
        assert_eq!(parse_max_points("Max Points"), None);
        assert_eq!(parse_max_points("-1"), None);
        assert_eq!(parse_max_points(""), None);
    }

    #[test]
    fn test_huge_max_points_saturate() {
        let rubric =
            parse_rubric(b"Task 2,First,,4294967295\n,Second,,4294967295\nTask 3,Third,,1\n")
                .unwrap();
        assert_eq!(rubric.criteria(2)[0].max_points, u32::MAX);
        assert_eq!(rubric.task_max_points(2), u32::MAX);
        assert_eq!(rubric.task_max_points(3), 1);
        assert_eq!(rubric.total_max_points(), u32::MAX);
    }

    #[test]
    fn test_load_rubric_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rubric.csv");
        std::fs::write(&path, RUBRIC).unwrap();
        let rubric = load_rubric(&path).unwrap();
        assert_eq!(rubric.criterion_count(), 4);

        let err = load_rubric(&dir.path().join("missing.csv")).unwrap_err();
        assert!(matches!(err, RubricError::NotFound { .. }));
    }
}
