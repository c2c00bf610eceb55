//! Mark sheet rendering.
//!
//! [`MarkSheet::build`] lays a marking result out as spreadsheet rows;
//! [`MarkSheet::write_xlsx`] and [`write_json`] put it on disk.

use crate::config::OutputConfig;
use crate::error::ReportError;
use crate::marker::{MarkingResult, needs_manual_review};
use crate::rubric::Rubric;
use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const HEADERS: [&str; 4] = [
    "Task Name",
    "Criterion Description",
    "Student Score",
    "Max Points",
];

const COLUMN_WIDTHS: [f64; 4] = [12.0, 60.0, 15.0, 12.0];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(u32),
}

impl Cell {
    fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Header,
    Criterion,
    Subtotal,
    GrandTotal,
    Spacer,
    IssuesHeader,
    Issue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub kind: RowKind,
    pub cells: [Cell; 4],
}

impl SheetRow {
    fn new(kind: RowKind, cells: [Cell; 4]) -> Self {
        Self { kind, cells }
    }
}

/// One student's marks, ready to render.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkSheet {
    pub student_id: String,
    pub rows: Vec<SheetRow>,
}

impl MarkSheet {
    /// Lay out `result` task by task in rubric order.
    pub fn build(result: &MarkingResult, rubric: &Rubric) -> Self {
        let mut rows = vec![SheetRow::new(RowKind::Header, HEADERS.map(Cell::text))];
        let mut grand_total: u32 = 0;

        for (&task_number, criteria) in &rubric.tasks {
            let marks = result
                .tasks
                .get(&task_number)
                .map(|t| t.marks.as_slice())
                .unwrap_or_default();
            let mut subtotal: u32 = 0;

            for (i, criterion) in criteria.iter().enumerate() {
                let label = if i == 0 {
                    Cell::Text(format!("Task {task_number}"))
                } else {
                    Cell::Empty
                };
                let score = match marks.get(i) {
                    Some(mark) => match mark.error_flag {
                        Some(flag) => Cell::Text(format!("{} ({flag})", mark.score)),
                        None => {
                            subtotal = subtotal.saturating_add(mark.score);
                            Cell::Number(mark.score)
                        }
                    },
                    None => Cell::Number(0),
                };
                rows.push(SheetRow::new(
                    RowKind::Criterion,
                    [
                        label,
                        Cell::text(criterion.text.as_str()),
                        score,
                        Cell::Number(criterion.max_points),
                    ],
                ));
            }

            rows.push(SheetRow::new(
                RowKind::Subtotal,
                [
                    Cell::Empty,
                    Cell::text("SUBTOTAL"),
                    Cell::Number(subtotal),
                    Cell::Number(rubric.task_max_points(task_number)),
                ],
            ));
            grand_total = grand_total.saturating_add(subtotal);
        }

        rows.push(SheetRow::new(
            RowKind::GrandTotal,
            [
                Cell::Empty,
                Cell::text("GRAND TOTAL"),
                Cell::Number(grand_total),
                Cell::Number(rubric.total_max_points()),
            ],
        ));

        if !result.issues.is_empty() {
            rows.push(SheetRow::new(RowKind::Spacer, empty_cells()));
            rows.push(SheetRow::new(
                RowKind::IssuesHeader,
                [Cell::text("ISSUES FOUND:"), Cell::Empty, Cell::Empty, Cell::Empty],
            ));
            for issue in &result.issues {
                rows.push(issue_row(issue.clone()));
            }
            let review = result
                .issues
                .iter()
                .filter(|i| needs_manual_review(i))
                .count();
            if review > 0 {
                rows.push(issue_row(format!("Manual review required for {review} items")));
            }
        }

        Self {
            student_id: result.student_id.clone(),
            rows,
        }
    }

    /// Score on the GRAND TOTAL row.
    pub fn grand_total(&self) -> Option<u32> {
        self.rows
            .iter()
            .find(|r| r.kind == RowKind::GrandTotal)
            .and_then(|r| match r.cells[2] {
                Cell::Number(n) => Some(n),
                _ => None,
            })
    }

    /// Write `<dir>/<student_id>_marks.xlsx`, creating `dir` if needed.
    pub fn write_xlsx(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        create_dir(dir)?;
        let path = dir.join(format!("{}_marks.xlsx", self.student_id));

        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name("Marking Sheet")?;
        for (col, width) in (0u16..).zip(COLUMN_WIDTHS) {
            worksheet.set_column_width(col, width)?;
        }
        worksheet.set_freeze_panes(1, 0)?;

        for (row, sheet_row) in (0u32..).zip(&self.rows) {
            for (col, cell) in (0u16..).zip(&sheet_row.cells) {
                match (cell, sheet_row.kind) {
                    (Cell::Empty, _) => {}
                    (Cell::Text(text), RowKind::Header) => {
                        worksheet.write_string_with_format(row, col, text, &bold)?;
                    }
                    (Cell::Text(text), _) => {
                        worksheet.write_string(row, col, text)?;
                    }
                    (Cell::Number(n), _) => {
                        worksheet.write_number(row, col, f64::from(*n))?;
                    }
                }
            }
        }

        workbook.save(&path)?;
        info!(path = %path.display(), rows = self.rows.len(), "Wrote mark sheet");
        Ok(path)
    }
}

fn empty_cells() -> [Cell; 4] {
    [Cell::Empty, Cell::Empty, Cell::Empty, Cell::Empty]
}

fn issue_row(text: String) -> SheetRow {
    SheetRow::new(
        RowKind::Issue,
        [Cell::text("•"), Cell::Text(text), Cell::Empty, Cell::Empty],
    )
}

fn create_dir(dir: &Path) -> Result<(), ReportError> {
    std::fs::create_dir_all(dir).map_err(|e| ReportError::Write {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    result: &'a MarkingResult,
}

/// Write `<dir>/<student_id>_marks.json` with a generation timestamp.
pub fn write_json(result: &MarkingResult, dir: &Path) -> Result<PathBuf, ReportError> {
    create_dir(dir)?;
    let path = dir.join(format!("{}_marks.json", result.student_id));
    let report = JsonReport {
        generated_at: Utc::now(),
        result,
    };
    let json = serde_json::to_string_pretty(&report).map_err(|e| ReportError::Write {
        path: path.clone(),
        message: e.to_string(),
    })?;
    std::fs::write(&path, json).map_err(|e| ReportError::Write {
        path: path.clone(),
        message: e.to_string(),
    })?;
    debug!(path = %path.display(), "Wrote JSON report");
    Ok(path)
}

/// Files produced for one student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub xlsx: PathBuf,
    pub json: Option<PathBuf>,
}

/// Write every report `output` asks for.
pub fn write_reports(
    result: &MarkingResult,
    rubric: &Rubric,
    output: &OutputConfig,
) -> Result<ReportPaths, ReportError> {
    let xlsx = MarkSheet::build(result, rubric).write_xlsx(&output.dir)?;
    let json = if output.write_json {
        Some(write_json(result, &output.dir)?)
    } else {
        None
    };
    Ok(ReportPaths { xlsx, json })
}
