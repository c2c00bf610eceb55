//! End-to-end marking: notebook and rubric files on disk, scripted backend,
//! reports written to a temporary directory.

use autograde_core::backend::MockBackend;
use autograde_core::config::{AutogradeConfig, OutputConfig};
use autograde_core::evaluator::CriterionEvaluator;
use autograde_core::marker::{AssignmentMarker, MarkFlag, MarkingStatus};
use autograde_core::report::{MarkSheet, write_reports};
use autograde_core::retry::RecordingSleeper;
use autograde_core::rubric::load_rubric;
use autograde_core::scale::ScaleCache;
use autograde_core::types::ErrorFlag;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const RUBRIC: &str = "\
Task Name,Criterion Description,Student Score,Max Points
Task 2 - Whisper,Returns the lowercased string,,2
,Works for an empty string,,2
,SUBTOTAL,,4
Task 3 - Product,Multiplies both arguments,,4
,SUBTOTAL,,4
Task 4 - Loop,Prints each item,,3
,SUBTOTAL,,3
";

fn write_fixtures(dir: &Path) -> (PathBuf, PathBuf) {
    let notebook = json!({
        "cells": [
            {"cell_type": "markdown", "source": ["# Task 2\n", "#### Your Solution"]},
            {"cell_type": "code", "source": ["def bot_whisper(s):\n", "    return s.lower()\n"]},
            {"cell_type": "markdown", "source": ["# Task 3\n", "#### Your Solution"]},
            {"cell_type": "code", "source": ["def product(a, b):\n", "    # Your code here\n", "    pass\n"]},
            {"cell_type": "markdown", "source": ["# Task 4\n", "# Your Solution:"]},
            {"cell_type": "code", "source": ""}
        ],
        "metadata": {},
        "nbformat": 4,
        "nbformat_minor": 5
    });
    let notebook_path = dir.join("s123.ipynb");
    std::fs::write(&notebook_path, notebook.to_string()).unwrap();
    let rubric_path = dir.join("rubric.csv");
    std::fs::write(&rubric_path, RUBRIC).unwrap();
    (notebook_path, rubric_path)
}

fn config(output_dir: PathBuf) -> AutogradeConfig {
    let mut config = AutogradeConfig::default();
    config.marking.expected_task_count = 3;
    config.output = OutputConfig {
        dir: output_dir,
        write_json: true,
    };
    config
}

fn marker(backend: Arc<MockBackend>, config: &AutogradeConfig) -> AssignmentMarker {
    let evaluator = CriterionEvaluator::from_config(backend, Arc::new(ScaleCache::new()), config)
        .with_sleeper(Arc::new(RecordingSleeper::new()));
    AssignmentMarker::from_config(evaluator, config)
}

#[tokio::test]
async fn test_mark_files_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (notebook_path, rubric_path) = write_fixtures(dir.path());
    let config = config(dir.path().join("out"));

    let backend = Arc::new(MockBackend::new());
    backend.queue_response("Reasoning: Uses str.lower as required.\nScore: 2");
    backend.queue_response("Reasoning: Empty input returns empty output.\nScore: 2");
    let mut marker = marker(backend.clone(), &config);

    let result = marker
        .mark_files("s123", &notebook_path, &rubric_path)
        .await
        .unwrap();

    // Task 2 is scored, task 3 is a stub, task 4 is empty.
    assert_eq!(result.total_score, 4);
    assert_eq!(result.max_points, 11);
    assert_eq!(result.tasks[&2].total_score, 4);
    assert!(
        result.tasks[&3]
            .marks
            .iter()
            .all(|m| m.error_flag == Some(MarkFlag::Evaluation(ErrorFlag::PlaceholderCode)))
    );
    assert!(result.tasks[&4].missing);
    assert_eq!(
        result.issues,
        vec![
            "Task 3 Criterion 1: PLACEHOLDER_CODE".to_string(),
            "Task 4: MISSING_TASK".to_string(),
        ]
    );
    assert_eq!(result.status, MarkingStatus::Completed);
    assert_eq!(backend.call_count(), 2);

    let stats = marker.statistics();
    assert_eq!(stats.assignments_processed, 1);
    assert_eq!(stats.backend_calls, 2);
    assert_eq!(stats.errors, 0);

    let rubric = load_rubric(&rubric_path).unwrap();
    let sheet = MarkSheet::build(&result, &rubric);
    assert_eq!(sheet.grand_total(), Some(4));

    let paths = write_reports(&result, &rubric, &config.output).unwrap();
    assert!(paths.xlsx.ends_with("out/s123_marks.xlsx"));
    assert!(paths.xlsx.exists());
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(paths.json.unwrap()).unwrap()).unwrap();
    assert_eq!(json["total_score"], 4);
    assert_eq!(json["tasks"]["4"]["marks"][0]["error_flag"], "MISSING_TASK");
}

#[tokio::test]
async fn test_backend_outage_needs_manual_review() {
    let dir = tempfile::tempdir().unwrap();
    let (notebook_path, rubric_path) = write_fixtures(dir.path());
    let config = config(dir.path().join("out"));

    // Empty queue: every call fails with a connection error.
    let backend = Arc::new(MockBackend::new());
    let mut marker = marker(backend.clone(), &config);

    let result = marker
        .mark_files("s124", &notebook_path, &rubric_path)
        .await
        .unwrap();

    assert_eq!(result.total_score, 0);
    assert_eq!(result.status, MarkingStatus::ZeroScore);
    assert_eq!(result.manual_review_count(), 2);
    assert_eq!(backend.call_count(), 8);
    assert_eq!(marker.statistics().backend_calls, 8);
    assert_eq!(marker.statistics().errors, 2);
}

#[tokio::test]
async fn test_missing_notebook_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (_, rubric_path) = write_fixtures(dir.path());
    let config = config(dir.path().join("out"));
    let mut marker = marker(Arc::new(MockBackend::new()), &config);

    let err = marker
        .mark_files("nobody", &dir.path().join("nobody.ipynb"), &rubric_path)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Notebook not found"));
    assert_eq!(marker.statistics().assignments_processed, 0);
}

#[test]
fn test_validate_setup_dry_run() {
    let dir = tempfile::tempdir().unwrap();
    let (notebook_path, rubric_path) = write_fixtures(dir.path());
    let out = dir.path().join("nested").join("out");
    let config = config(out.clone());
    let backend = Arc::new(MockBackend::new());
    let marker = marker(backend.clone(), &config);

    assert!(marker.validate_setup(&notebook_path, &rubric_path).is_empty());
    assert!(out.is_dir());
    assert_eq!(backend.call_count(), 0);

    let bad_rubric = dir.path().join("bad.csv");
    std::fs::write(&bad_rubric, "nothing,useful\n").unwrap();
    let issues = marker.validate_setup(&notebook_path, &bad_rubric);
    assert_eq!(issues.len(), 1);
    assert!(issues[0].starts_with("Rubric parsing failed"));
}
