//! testgate - test orchestration CLI
//!
//! ## Commands
//!
//! - `burn-in`: rerun the end-to-end suite N times to surface flaky tests
//! - `selective`: run only the test scopes touched by the current diff
//! - `local-ci`: lint, unit, e2e and a short burn-in, stopping at the first failure
//!
//! Every command exits 0 on success and 1 on failure or invalid input.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use testgate_ci::{
    detect_changes, write_report_json, BurnInHarness, ChangeSelector, FullSuiteReason,
    IterationCount, LocalCiPipeline, ReportBody, RunReport, SelectionPlan, TestgateConfig,
    UnmatchedPolicy,
};
use testgate_core::{capture_head_sha, CommandTaskExecutor, PackageManager, Task};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "testgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Burn-in, change-scoped and local CI test runs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (default: testgate.toml when present)
    #[arg(long, global = true, env = "TESTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Package manager for script tasks (npm, pnpm, yarn)
    #[arg(long, global = true)]
    package_manager: Option<PackageManager>,

    /// Per-command timeout in seconds (0 disables it)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rerun a test task repeatedly, stopping at the first failure
    #[command(alias = "run-burn-in")]
    BurnIn {
        /// Number of iterations (positive integer, default 10)
        #[arg(short = 'n', long, env = "BURN_IN_ITERATIONS", allow_hyphen_values = true)]
        iterations: Option<String>,

        /// Command line to run instead of the configured task
        #[arg(long, conflicts_with = "script")]
        command: Option<String>,

        /// Package script to run instead of the configured task
        #[arg(long)]
        script: Option<String>,

        /// Sub-project the script belongs to
        #[arg(long, requires = "script")]
        workspace: Option<String>,

        /// Run every iteration even after a failure
        #[arg(long)]
        keep_going: bool,

        /// Write a JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Run the test scopes affected by changes since a base ref
    #[command(alias = "run-selective")]
    Selective {
        /// Base ref to diff against (default: origin/main)
        #[arg(long, env = "TESTGATE_BASE_REF")]
        base: Option<String>,

        /// Run the full suite whatever changed
        #[arg(long)]
        force_full: bool,

        /// What to do when no scope matches: skip or run-all
        #[arg(long)]
        unmatched: Option<UnmatchedPolicy>,

        /// Repository to inspect and run in
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Write a JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Mirror CI locally: lint, unit, e2e, then a short burn-in
    #[command(alias = "run-local-ci")]
    LocalCi {
        /// Iterations for the burn-in stage (default 3)
        #[arg(long, allow_hyphen_values = true)]
        burn_in_iterations: Option<i64>,

        /// Stages to skip (comma-separated: lint,unit,e2e,burn_in)
        #[arg(long, value_delimiter = ',')]
        skip: Vec<String>,

        /// Write a JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    testgate_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;
    let mut executor = config.executor();
    if let Some(pm) = cli.package_manager {
        executor.package_manager = pm;
    }
    if let Some(timeout) = cli.timeout {
        executor.timeout_secs = timeout;
    }

    match cli.command {
        Commands::BurnIn {
            iterations,
            command,
            script,
            workspace,
            keep_going,
            report,
        } => {
            let task = task_override(command, script, workspace)?;
            cmd_burn_in(
                &config,
                &executor,
                iterations.as_deref(),
                task,
                keep_going,
                report.as_deref(),
            )
            .await
        }
        Commands::Selective {
            base,
            force_full,
            unmatched,
            repo,
            report,
        } => {
            cmd_selective(
                &config,
                executor,
                base,
                force_full,
                unmatched,
                &repo,
                report.as_deref(),
            )
            .await
        }
        Commands::LocalCi {
            burn_in_iterations,
            skip,
            report,
        } => cmd_local_ci(config, &executor, burn_in_iterations, skip, report.as_deref()).await,
    }
}

/// Load an explicit config file, or `testgate.toml` when it exists.
fn load_config(path: Option<&Path>) -> Result<TestgateConfig> {
    let config = match path {
        Some(path) => TestgateConfig::load(path),
        None => TestgateConfig::load_or_default(&TestgateConfig::default_path()),
    };
    config.context("Failed to load configuration")
}

/// Task given on the command line, if any.
fn task_override(
    command: Option<String>,
    script: Option<String>,
    workspace: Option<String>,
) -> Result<Option<Task>> {
    match (command, script) {
        (Some(line), _) => Ok(Some(Task::from_command_line(&line)?)),
        (None, Some(script)) => Ok(Some(Task::Script { script, workspace })),
        (None, None) => Ok(None),
    }
}

/// Rerun a task and fail fast on the first failing iteration
async fn cmd_burn_in(
    config: &TestgateConfig,
    executor: &CommandTaskExecutor,
    iterations: Option<&str>,
    task: Option<Task>,
    keep_going: bool,
    report: Option<&Path>,
) -> Result<()> {
    // Validated before anything is spawned
    let iterations = match iterations {
        Some(raw) => raw.parse::<IterationCount>()?,
        None => config.burn_in_iterations()?,
    };
    let task = task.unwrap_or_else(|| config.burn_in_task());

    println!("Burn-in: {} x{}", task, iterations.get());
    println!();

    let harness = BurnInHarness::new(iterations).keep_going(keep_going);
    let aggregate = harness
        .run_observed(executor, &task, |run| {
            if run.passed() {
                println!("Iteration {} PASSED", run.iteration);
            } else {
                println!("Iteration {} FAILED", run.iteration);
                if let Some(diagnostic) = &run.diagnostic {
                    println!("  {}", diagnostic);
                }
            }
        })
        .await
        .context("Burn-in aborted")?;

    write_report(
        report,
        Path::new("."),
        ReportBody::BurnIn {
            task: task.label(),
            aggregate: aggregate.clone(),
        },
    )?;

    println!();
    if aggregate.passed() {
        println!("✓ Burn-in passed: {}", aggregate.summary_line());
        Ok(())
    } else {
        println!("✗ Burn-in {}", aggregate.summary_line());
        if let Some(k) = aggregate.first_failure() {
            println!("Investigate iteration {} for flakiness", k);
        }
        anyhow::bail!("Burn-in detected failing iterations")
    }
}

/// Run the scopes touched by the diff against the base ref
async fn cmd_selective(
    config: &TestgateConfig,
    mut executor: CommandTaskExecutor,
    base: Option<String>,
    force_full: bool,
    unmatched: Option<UnmatchedPolicy>,
    repo: &Path,
    report: Option<&Path>,
) -> Result<()> {
    let mut selector_config = config
        .selector_config()
        .context("Invalid selective configuration")?;
    if let Some(policy) = unmatched {
        selector_config.unmatched = policy;
    }
    let base = base.unwrap_or_else(|| config.selective.base_ref.clone());

    let detection = detect_changes(repo, &base);
    println!("Changes: {}", detection.describe());
    if let Some(changes) = detection.changes() {
        for path in changes.iter() {
            println!("  {}", path);
        }
    }
    println!();

    let selector = ChangeSelector::new(selector_config).force_full(force_full);
    match selector.plan_for(&detection) {
        SelectionPlan::FullSuite { reason, task } => {
            println!("Running full suite ({}): {}", reason_text(reason), task)
        }
        SelectionPlan::Scoped { scopes, unmatched } => {
            for scope in &scopes {
                println!(
                    "Scope {}: {} ({} file(s))",
                    scope.scope,
                    scope.task,
                    scope.matched_paths.len()
                );
            }
            if !unmatched.is_empty() {
                println!("{} file(s) belong to no scope", unmatched.len());
            }
        }
        SelectionPlan::NothingToRun { unmatched } => println!(
            "ℹ No test scope matches the {} changed file(s); skipping tests (use --force-full to run everything)",
            unmatched.len()
        ),
    }

    executor.working_dir = Some(repo.to_path_buf());
    let result = selector
        .run_observed(&executor, &detection, |scope| {
            let status = if scope.outcome.passed() { "✓" } else { "✗" };
            println!(
                "  {} {} ({}ms)",
                status, scope.scope, scope.outcome.duration_ms
            );
        })
        .await
        .context("Selective run aborted")?;

    write_report(
        report,
        repo,
        ReportBody::Selective {
            detection,
            result: result.clone(),
        },
    )?;

    println!();
    if result.success {
        println!(
            "✓ Selective tests passed ({} command(s) run)",
            result.outcomes.len()
        );
        Ok(())
    } else {
        println!("✗ Failed scopes: {}", result.failed_scopes().join(", "));
        anyhow::bail!("Selective tests failed")
    }
}

fn reason_text(reason: FullSuiteReason) -> &'static str {
    match reason {
        FullSuiteReason::NoChanges => "no changes detected",
        FullSuiteReason::ChangesUnavailable => "changes unavailable",
        FullSuiteReason::Forced => "forced",
        FullSuiteReason::UnmatchedChanges => "changes outside known scopes",
    }
}

/// Run the local CI stages, halting at the first failure
async fn cmd_local_ci(
    mut config: TestgateConfig,
    executor: &CommandTaskExecutor,
    burn_in_iterations: Option<i64>,
    skip: Vec<String>,
    report: Option<&Path>,
) -> Result<()> {
    if burn_in_iterations.is_some() {
        config.local_ci.burn_in_iterations = burn_in_iterations;
    }
    config.local_ci.skip.extend(skip);
    let stages = config
        .local_ci_stages()
        .context("Invalid local CI configuration")?;

    let names: Vec<&str> = stages
        .iter()
        .filter(|s| s.enabled)
        .map(|s| s.name.as_str())
        .collect();
    println!("Running local CI: {}", names.join(" → "));
    println!();

    let result = LocalCiPipeline::run_observed(executor, stages, |stage| {
        let status = if stage.passed() { "✓" } else { "✗" };
        println!(
            "  {} {} ({}ms, {})",
            status, stage.stage_name, stage.duration_ms, stage.summary
        );
    })
    .await
    .context("Local CI aborted")?;

    write_report(
        report,
        Path::new("."),
        ReportBody::LocalCi {
            result: result.clone(),
        },
    )?;

    println!();
    println!(
        "Summary: {}/{} stages passed",
        result.passed_count(),
        result.stages.len()
    );

    if result.success {
        println!("\n✓ All checks passed!");
        Ok(())
    } else {
        if let Some(stage) = &result.halted_at {
            println!("✗ Halted at stage {}", stage);
        }
        anyhow::bail!("Local CI failed")
    }
}

/// Write the JSON report, stamping it with the HEAD of `repo` when known.
fn write_report(path: Option<&Path>, repo: &Path, body: ReportBody) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };

    let git_sha = capture_head_sha(repo).ok();
    let report = RunReport::new(body, git_sha);
    write_report_json(path, &report).with_context(|| format!("write report {:?}", path))?;
    info!(path = %path.display(), run_id = %report.run_id, "Report written");
    Ok(())
}
