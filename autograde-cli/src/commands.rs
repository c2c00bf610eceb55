//! Marking run and subcommand handlers.

use crate::ConfigAction;
use autograde_core::backend::MockBackend;
use autograde_core::config::AutogradeConfig;
use autograde_core::marker::{AssignmentMarker, MarkingResult, MarkingStats};
use autograde_core::notebook::NotebookParser;
use autograde_core::report::{ReportPaths, write_reports};
use autograde_core::rubric::load_rubric;
use autograde_core::scale::ScaleCache;
use autograde_core::{CriterionEvaluator, GradeError, ScoringBackend, create_backend};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Exit status after Ctrl-C.
const INTERRUPTED: u8 = 130;

/// One marking invocation.
#[derive(Debug, Clone)]
pub struct MarkRun {
    pub notebook: PathBuf,
    pub rubric: PathBuf,
    pub student_id: Option<String>,
    pub dry_run: bool,
}

/// Reject inputs with the wrong file extension.
pub fn check_extensions(notebook: &Path, rubric: &Path) -> anyhow::Result<()> {
    if !has_extension(notebook, "ipynb") {
        anyhow::bail!(
            "Notebook must be a .ipynb file: {}",
            notebook.display()
        );
    }
    if !has_extension(rubric, "csv") {
        anyhow::bail!("Rubric must be a .csv file: {}", rubric.display());
    }
    Ok(())
}

fn has_extension(path: &Path, expected: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(expected))
}

/// The student id: explicit, else the notebook file stem.
pub fn student_id(notebook: &Path, explicit: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| {
            notebook
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "student".to_string())
}

fn build_marker(backend: Arc<dyn ScoringBackend>, config: &AutogradeConfig) -> AssignmentMarker {
    let evaluator = CriterionEvaluator::from_config(backend, Arc::new(ScaleCache::new()), config);
    AssignmentMarker::from_config(evaluator, config)
}

/// Mark one notebook, or validate the setup on a dry run.
pub async fn run_marking(run: MarkRun, config: AutogradeConfig) -> anyhow::Result<ExitCode> {
    check_extensions(&run.notebook, &run.rubric)?;
    let student_id = student_id(&run.notebook, run.student_id.as_deref());

    if run.dry_run {
        return Ok(dry_run(&run, &config));
    }

    let backend = create_backend(&config.llm)?;
    info!(
        provider = backend.name(),
        model = backend.model_name(),
        student = %student_id,
        "Starting marking run"
    );

    let rubric = load_rubric(&run.rubric)?;
    let notebook = NotebookParser::from_config(&config.marking).parse_file(&run.notebook)?;
    let mut marker = build_marker(backend, &config);
    let started = Instant::now();

    let result = tokio::select! {
        result = marker.mark_assignment(&student_id, &notebook, &rubric) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(student = %student_id, "Marking interrupted");
            eprintln!("\nInterrupted. No mark sheet was written.");
            return Ok(ExitCode::from(INTERRUPTED));
        }
    };

    let paths = write_reports(&result, &rubric, &config.output)?;
    print!(
        "{}",
        render_summary(&result, &paths, marker.statistics(), started.elapsed().as_secs_f64())
    );
    Ok(ExitCode::SUCCESS)
}

fn dry_run(run: &MarkRun, config: &AutogradeConfig) -> ExitCode {
    let marker = build_marker(Arc::new(MockBackend::new()), config);
    let mut issues = marker.validate_setup(&run.notebook, &run.rubric);
    if let Err(e) = create_backend(&config.llm) {
        issues.push(format!("Backend not ready: {e}"));
    }

    if issues.is_empty() {
        println!("Setup is valid. Ready to mark.");
        println!("  Provider: {}", config.llm.provider);
        println!("  Model: {}", config.llm.model);
        println!("  Output: {}", marker.output_dir().display());
        ExitCode::SUCCESS
    } else {
        println!("Setup has {} problem(s):", issues.len());
        for issue in &issues {
            println!("  - {issue}");
        }
        ExitCode::FAILURE
    }
}

/// Human-readable summary of a marking run.
pub fn render_summary(
    result: &MarkingResult,
    paths: &ReportPaths,
    stats: &MarkingStats,
    elapsed_secs: f64,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Marking complete for {}", result.student_id);
    let _ = writeln!(
        out,
        "  Total: {}/{} ({:.1}%)",
        result.total_score,
        result.max_points,
        result.percentage()
    );
    for task in result.tasks.values() {
        let note = if task.missing { " (missing)" } else { "" };
        let _ = writeln!(
            out,
            "    Task {}: {}/{}{}",
            task.task_number, task.total_score, task.max_points, note
        );
    }

    if result.issues.is_empty() {
        let _ = writeln!(out, "  Issues: none");
    } else {
        let _ = writeln!(
            out,
            "  Issues: {} ({} need manual review)",
            result.issues.len(),
            result.manual_review_count()
        );
        for issue in result.issues.iter().take(10) {
            let _ = writeln!(out, "    - {issue}");
        }
        if result.issues.len() > 10 {
            let _ = writeln!(out, "    ... and {} more", result.issues.len() - 10);
        }
    }

    let _ = writeln!(out, "  Status: {}", result.status);
    let _ = writeln!(out, "  Time: {elapsed_secs:.1}s");
    let _ = writeln!(out, "  Mark sheet: {}", paths.xlsx.display());
    if let Some(json) = &paths.json {
        let _ = writeln!(out, "  JSON report: {}", json.display());
    }
    let _ = writeln!(
        out,
        "  Backend calls: {}, errors: {} ({:.1}% error rate)",
        stats.backend_calls,
        stats.errors,
        stats.error_rate() * 100.0
    );
    out
}

/// Handle `autograde config ...`.
pub fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    explicit: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".autograde");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&AutogradeConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let mut config = autograde_core::config::load_config(Some(workspace), explicit)
                .map_err(GradeError::from)?;
            if config.llm.api_key.is_some() {
                config.llm.api_key = Some("<redacted>".to_string());
            }
            println!("{}", toml::to_string_pretty(&config)?);
            for warning in config.validate() {
                println!("# warning: {warning}");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autograde_core::marker::{MarkingStatus, TaskResult};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn test_check_extensions() {
        assert!(check_extensions(Path::new("a.ipynb"), Path::new("r.csv")).is_ok());
        assert!(check_extensions(Path::new("A.IPYNB"), Path::new("R.CSV")).is_ok());
        let err = check_extensions(Path::new("a.py"), Path::new("r.csv")).unwrap_err();
        assert!(err.to_string().contains(".ipynb"));
        let err = check_extensions(Path::new("a.ipynb"), Path::new("r.xlsx")).unwrap_err();
        assert!(err.to_string().contains(".csv"));
    }

    #[test]
    fn test_student_id_defaults_to_file_stem() {
        assert_eq!(student_id(Path::new("subs/jane_doe.ipynb"), None), "jane_doe");
        assert_eq!(student_id(Path::new("subs/x.ipynb"), Some("s42")), "s42");
    }

    #[test]
    fn test_render_summary() {
        let result = MarkingResult {
            student_id: "s42".into(),
            total_score: 3,
            max_points: 4,
            tasks: BTreeMap::from([(
                2,
                TaskResult {
                    task_number: 2,
                    total_score: 3,
                    max_points: 4,
                    ..TaskResult::default()
                },
            )]),
            issues: vec!["Task 2 Criterion 2: API_ERROR".into()],
            processing_time: Duration::from_secs(2),
            status: MarkingStatus::Completed,
        };
        let paths = ReportPaths {
            xlsx: PathBuf::from("out/s42_marks.xlsx"),
            json: None,
        };
        let stats = MarkingStats {
            assignments_processed: 1,
            backend_calls: 5,
            errors: 1,
            processing_time: Duration::from_secs(2),
        };

        let summary = render_summary(&result, &paths, &stats, 2.0);
        assert!(summary.contains("Total: 3/4 (75.0%)"));
        assert!(summary.contains("Task 2: 3/4"));
        assert!(summary.contains("Issues: 1 (1 need manual review)"));
        assert!(summary.contains("Status: Completed"));
        assert!(summary.contains("Mark sheet: out/s42_marks.xlsx"));
        assert!(summary.contains("(20.0% error rate)"));
        assert!(!summary.contains("JSON report"));
    }

    #[test]
    fn test_config_init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        handle_config(ConfigAction::Init, dir.path(), None).unwrap();
        let path = dir.path().join(".autograde").join("config.toml");
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[llm]"));
        assert!(written.contains("max_retries = 3"));

        std::fs::write(&path, "# edited").unwrap();
        handle_config(ConfigAction::Init, dir.path(), None).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# edited");
    }
}
