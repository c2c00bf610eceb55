//! Notebook loading: pull each task's solution code out of an `.ipynb` file.
//!
//! A solution is announced by a markdown cell containing one of the solution
//! markers; the first code cell within the next two cells holds the answer.
//! Tasks are numbered in the order their markers appear.

use crate::error::NotebookError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Markdown that introduces a solution cell.
pub const SOLUTION_MARKERS: [&str; 2] = ["#### Your Solution", "# Your Solution:"];

/// How many cells after a marker may hold its code.
const LOOKAHEAD_CELLS: usize = 2;

/// Solutions extracted from one notebook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedNotebook {
    /// Task number to code; missing expected tasks map to an empty string.
    pub tasks: BTreeMap<u32, String>,
    pub issues: Vec<String>,
}

impl ParsedNotebook {
    /// Code for a task, if the notebook has an entry for it.
    pub fn code(&self, task_number: u32) -> Option<&str> {
        self.tasks.get(&task_number).map(String::as_str)
    }

    /// Number of tasks with non-empty code.
    pub fn solved_count(&self) -> usize {
        self.tasks.values().filter(|c| !c.trim().is_empty()).count()
    }
}

/// Extracts task solutions from notebooks.
#[derive(Debug, Clone)]
pub struct NotebookParser {
    first_task_number: u32,
    expected_task_count: u32,
}

impl NotebookParser {
    pub fn new(first_task_number: u32, expected_task_count: u32) -> Self {
        Self {
            first_task_number,
            expected_task_count,
        }
    }

    pub fn from_config(config: &crate::config::MarkingConfig) -> Self {
        Self::new(config.first_task_number, config.expected_task_count)
    }

    /// Read and parse a notebook file.
    pub fn parse_file(&self, path: &Path) -> Result<ParsedNotebook, NotebookError> {
        if !path.exists() {
            return Err(NotebookError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|source| NotebookError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_str(&text)
    }

    /// Parse notebook JSON text.
    pub fn parse_str(&self, text: &str) -> Result<ParsedNotebook, NotebookError> {
        let document: Value = serde_json::from_str(text).map_err(|e| NotebookError::InvalidJson {
            message: e.to_string(),
        })?;
        let cells = document
            .get("cells")
            .and_then(Value::as_array)
            .ok_or(NotebookError::MissingCells)?;
        info!(cells = cells.len(), "Loaded notebook");
        Ok(self.extract(cells))
    }

    fn extract(&self, cells: &[Value]) -> ParsedNotebook {
        let mut parsed = ParsedNotebook::default();
        let mut next_task = self.first_task_number;

        for (index, cell) in cells.iter().enumerate() {
            if cell_type(cell) != Some("markdown") || !is_solution_marker(&cell_source(cell)) {
                continue;
            }
            debug!(cell = index, "Found solution marker");

            let code_cell = cells
                .iter()
                .skip(index + 1)
                .take(LOOKAHEAD_CELLS)
                .find(|c| cell_type(c) == Some("code"));

            let Some(code_cell) = code_cell else {
                let issue = format!("No code cell found after solution marker in cell {index}");
                warn!("{issue}");
                parsed.issues.push(issue);
                continue;
            };

            let code = cell_source(code_cell).trim().to_string();
            debug!(task = next_task, chars = code.len(), "Extracted task code");
            parsed.tasks.insert(next_task, code);
            next_task += 1;
        }

        let found = parsed.tasks.len();
        if found < self.expected_task_count as usize {
            let issue = format!(
                "Expected {} tasks, found {}",
                self.expected_task_count, found
            );
            warn!("{issue}");
            parsed.issues.push(issue);
        }

        for task in self.expected_tasks() {
            if !parsed.tasks.contains_key(&task) {
                warn!(task, "Task is missing from notebook");
                parsed.tasks.insert(task, String::new());
                parsed.issues.push(format!("Task {task}: MISSING_TASK"));
            }
        }

        parsed
    }

    fn expected_tasks(&self) -> impl Iterator<Item = u32> {
        self.first_task_number..self.first_task_number + self.expected_task_count
    }
}

impl Default for NotebookParser {
    fn default() -> Self {
        Self::from_config(&crate::config::MarkingConfig::default())
    }
}

fn is_solution_marker(text: &str) -> bool {
    SOLUTION_MARKERS.iter().any(|m| text.contains(m))
}

fn cell_type(cell: &Value) -> Option<&str> {
    cell.get("cell_type").and_then(Value::as_str)
}

/// Cell source is either a string or a list of line strings.
fn cell_source(cell: &Value) -> String {
    match cell.get("source") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(lines)) => lines.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}
