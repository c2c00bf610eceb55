//! Autograde CLI: mark a Jupyter notebook assignment against a rubric.
//!
//! Runs a single student per invocation and writes a mark sheet to the
//! output directory.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Autograde: LLM marking for notebook assignments
#[derive(Parser, Debug)]
#[command(name = "autograde", version, about, long_about = None)]
struct Cli {
    /// Student notebook (.ipynb)
    #[arg(short, long)]
    notebook: Option<PathBuf>,

    /// Marking rubric (.csv)
    #[arg(short, long)]
    rubric: Option<PathBuf>,

    /// Student identifier (defaults to the notebook file name)
    #[arg(short, long)]
    student_id: Option<String>,

    /// LLM model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Backend provider: openai, anthropic
    #[arg(long)]
    provider: Option<String>,

    /// Directory for mark sheets
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Retries per criterion after the first attempt
    #[arg(long)]
    max_retries: Option<u32>,

    /// Criteria evaluated at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workspace directory (for .autograde/config.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Check files and configuration without calling the backend
    #[arg(long)]
    dry_run: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default .autograde/config.toml in the workspace
    Init,
    /// Show the effective configuration
    Show,
}

/// Stderr log filter for the verbosity flags.
fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(log_filter(cli.verbose, cli.quiet)));

    // JSON file layer for structured logging
    let log_dir = autograde_core::config::log_dir().unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "autograde.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(Commands::Config { action }) = cli.command {
        commands::handle_config(action, &workspace, cli.config.as_deref())?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut config =
        autograde_core::config::load_config(Some(&workspace), cli.config.as_deref())
            .map_err(autograde_core::GradeError::from)?;

    // Apply CLI overrides
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(provider) = &cli.provider {
        config.llm.provider = provider.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.output.dir = dir.clone();
    }
    if let Some(retries) = cli.max_retries {
        config.retry.max_retries = retries;
    }
    if let Some(concurrency) = cli.concurrency {
        config.evaluation.max_concurrency = concurrency;
    }
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }

    let (Some(notebook), Some(rubric)) = (cli.notebook, cli.rubric) else {
        anyhow::bail!("--notebook and --rubric are required");
    };
    let run = commands::MarkRun {
        notebook,
        rubric,
        student_id: cli.student_id,
        dry_run: cli.dry_run,
    };
    commands::run_marking(run, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_log_filter_levels() {
        assert_eq!(log_filter(0, true), "error");
        assert_eq!(log_filter(0, false), "info");
        assert_eq!(log_filter(1, false), "debug");
        assert_eq!(log_filter(2, false), "trace");
        assert_eq!(log_filter(1, true), "debug");
    }

    #[test]
    fn test_parse_marking_flags() {
        let cli = Cli::try_parse_from([
            "autograde",
            "--notebook",
            "s1.ipynb",
            "--rubric",
            "rubric.csv",
            "--max-retries",
            "5",
            "--concurrency",
            "3",
            "--provider",
            "anthropic",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.notebook, Some(PathBuf::from("s1.ipynb")));
        assert_eq!(cli.max_retries, Some(5));
        assert_eq!(cli.concurrency, Some(3));
        assert_eq!(cli.provider.as_deref(), Some("anthropic"));
        assert_eq!(cli.verbose, 2);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_parse_config_subcommand() {
        let cli = Cli::try_parse_from(["autograde", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Show
            })
        ));
    }
}
