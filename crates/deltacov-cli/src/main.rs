//! deltacov restricts a code coverage tree to the lines changed between two revisions.
//!
//! This CLI builds the change index from git, filters a JSON or LCOV coverage
//! input down to changed lines and writes the filtered tree.

use clap::{ArgAction, Args, Parser, Subcommand};
use deltacov_adapters_coverage::bundle_to_json;
use deltacov_adapters_git::GitCli;
use deltacov_app::{
    AppError, ChangeOptions, CoverageInput, FilterRequest, SystemClock, change_listing,
    resolve_revisions, run_filter, scan_changes,
};
use deltacov_config::{
    CliOverrides, Config, ConfigError, EffectiveConfig, discover_config, load_config,
    resolve_config,
};
use deltacov_types::Report;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// deltacov restricts a code coverage tree to the lines changed between two revisions.
#[derive(Parser)]
#[command(name = "deltacov")]
#[command(about = "deltacov restricts a code coverage tree to the lines changed between two revisions.")]
#[command(version)]
struct Cli {
    /// Increase log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that talks to git.
#[derive(Args, Debug, Clone)]
struct RevisionArgs {
    /// Base revision to diff against (overrides config file)
    #[arg(long)]
    base: Option<String>,

    /// Head revision (default: the checked-out HEAD)
    #[arg(long)]
    head: Option<String>,

    /// Project root the diff runs in (default: git top-level directory)
    #[arg(long)]
    root: Option<String>,

    /// Path to config file (default: auto-discover deltacov.toml)
    #[arg(long, short = 'c')]
    config: Option<String>,

    /// Git executable (overrides config file)
    #[arg(long)]
    git: Option<String>,

    /// Path segment where package directories start (overrides config file)
    #[arg(long)]
    source_root: Option<String>,

    /// Source file extension (overrides config file)
    #[arg(long)]
    extension: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter a coverage tree down to changed lines
    Filter {
        #[command(flatten)]
        revisions: RevisionArgs,

        /// Coverage tree in deltacov JSON form
        #[arg(long, conflicts_with = "lcov", required_unless_present = "lcov")]
        coverage: Option<String>,

        /// LCOV tracefile (repeatable, merged)
        #[arg(long)]
        lcov: Vec<String>,

        /// Output path for the filtered coverage JSON
        #[arg(long, default_value = "artifacts/deltacov/filtered.json")]
        out: String,

        /// Output path for the run report JSON
        #[arg(long)]
        report: Option<String>,
    },
    /// Print the changed files and lines between two revisions
    Changes {
        #[command(flatten)]
        revisions: RevisionArgs,

        /// Write the listing to a file instead of stdout
        #[arg(long)]
        out: Option<String>,
    },
}

/// CLI errors
#[derive(Debug, Error)]
enum CliError {
    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    DirCreate {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to load config: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    App(#[from] AppError),
}

/// Exit codes:
/// - 0: Success
/// - 1: Tool/runtime error (git failure, unreadable input, bad config)
/// - 2: Usage error (reported by clap)
const EXIT_CODE_ERROR: i32 = 1;

fn main() {
    let exit_code = match Cli::try_parse() {
        Ok(cli) => {
            init_logging(cli.verbose);
            match run(cli) {
                Ok(()) => 0,
                Err(e) => {
                    log::debug!("run failed: {:?}", e);
                    eprintln!("error: {}", e);
                    EXIT_CODE_ERROR
                }
            }
        }
        Err(clap_err) => clap_err.exit(),
    };
    std::process::exit(exit_code);
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Filter {
            revisions,
            coverage,
            lcov,
            out,
            report,
        } => run_filter_command(&revisions, coverage, lcov, &out, report.as_deref()),
        Commands::Changes { revisions, out } => run_changes_command(&revisions, out.as_deref()),
    }
}

fn run_filter_command(
    args: &RevisionArgs,
    coverage: Option<String>,
    lcov: Vec<String>,
    out: &str,
    report_path: Option<&str>,
) -> Result<(), CliError> {
    let effective = effective_config(args)?;
    let base = effective.require_base()?.to_string();
    let provider = git_provider(args, &effective);

    let coverage = match coverage {
        Some(path) => CoverageInput::Json(PathBuf::from(path)),
        None => CoverageInput::Lcov(lcov.into_iter().map(PathBuf::from).collect()),
    };
    let request = FilterRequest {
        base,
        head: effective.head_revision.clone(),
        options: ChangeOptions::from_config(&effective),
        coverage,
    };

    let result = run_filter(&request, &provider, &SystemClock)?;

    write_file(out, &bundle_to_json(&result.bundle).map_err(AppError::from)?)?;
    if let Some(path) = report_path {
        write_file(path, &serde_json::to_string_pretty(&result.report)?)?;
    }

    println!("{}", summary_line(&result.report, out));
    Ok(())
}

fn run_changes_command(args: &RevisionArgs, out: Option<&str>) -> Result<(), CliError> {
    let effective = effective_config(args)?;
    let base = effective.require_base()?;
    let provider = git_provider(args, &effective);

    let revisions = resolve_revisions(&provider, base, effective.head_revision.as_deref())?;
    let scan = scan_changes(&provider, &revisions, &ChangeOptions::from_config(&effective))?;
    for skipped in &scan.skipped {
        log::info!("skipped '{}' ({})", skipped.line, skipped.reason.as_str());
    }

    let listing = serde_json::to_string_pretty(&change_listing(&scan.index, &revisions))?;
    match out {
        Some(path) => write_file(path, &listing)?,
        None => println!("{}", listing),
    }
    Ok(())
}

/// Load the config file and apply CLI overrides.
fn effective_config(args: &RevisionArgs) -> Result<EffectiveConfig, CliError> {
    let config: Option<Config> = match &args.config {
        Some(path) => Some(load_config(Path::new(path))?),
        None => match discover_config()? {
            Some((path, config)) => {
                log::info!("using config {}", path.display());
                Some(config)
            }
            None => None,
        },
    };

    let overrides = CliOverrides {
        diff_executable: args.git.clone(),
        base_revision: args.base.clone(),
        head_revision: args.head.clone(),
        source_root_marker: args.source_root.clone(),
        source_extension: args.extension.clone(),
    };

    let effective = resolve_config(config.as_ref(), &overrides);
    effective.validate()?;
    Ok(effective)
}

fn git_provider(args: &RevisionArgs, effective: &EffectiveConfig) -> GitCli {
    let root = resolve_repo_root(args.root.as_deref(), &effective.diff_executable);
    log::debug!("project root {}", root.display());
    GitCli::with_executable(&effective.diff_executable, root)
}

fn resolve_repo_root(root: Option<&str>, git: &str) -> PathBuf {
    if let Some(path) = root {
        return PathBuf::from(path);
    }
    if let Ok(output) = std::process::Command::new(git)
        .args(["rev-parse", "--show-toplevel"])
        .output()
        && output.status.success()
    {
        let value = String::from_utf8_lossy(&output.stdout);
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn summary_line(report: &Report, out: &str) -> String {
    let data = &report.data;
    let pct = match data.coverage_pct() {
        Some(pct) => format!("{:.1}%", pct),
        None => "n/a".to_string(),
    };
    format!(
        "deltacov: {} changed files, {} changed lines, {} missed, {} covered, changed-line coverage {} (wrote {})",
        data.changed_files, data.changed_lines, data.missed_lines, data.covered_lines, pct, out
    )
}

fn write_file(path: &str, content: &str) -> Result<(), CliError> {
    ensure_parent_dir(path)?;
    fs::write(path, content).map_err(|e| CliError::FileWrite {
        path: path.to_string(),
        source: e,
    })
}

fn ensure_parent_dir(path: &str) -> Result<(), CliError> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| CliError::DirCreate {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    Ok(())
}
