//! Shared command execution.
//!
//! Every test command testgate runs, whether a burn-in iteration, a
//! triggered scope or a local CI stage, goes through [`execute`]. A launch
//! failure and a non-zero exit are reported the same way: as a failed
//! [`ExecOutcome`]. Output is passed through or captured, never parsed.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{Result, TestgateError};

/// A single external command to run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Label used in logs and outcomes.
    pub name: String,

    /// Command line; the first element is the executable.
    pub argv: Vec<String>,

    /// Wall-clock limit in seconds. 0 disables the limit.
    pub timeout_secs: u64,

    /// Pipe stdout/stderr into the outcome instead of inheriting them.
    pub capture: bool,

    /// Working directory for the child.
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            name: name.into(),
            argv,
            timeout_secs: 0,
            capture: false,
            working_dir: None,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn captured(mut self) -> Self {
        self.capture = true;
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Shell-like rendering of the command line.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Success or failure of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Succeeded,
    Failed,
}

/// Why an execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The process exited with a non-zero code.
    NonZeroExit,

    /// The process could not be launched (not found, permission denied...).
    SpawnFailed,

    /// The wall-clock limit expired and the process was killed.
    TimedOut,

    /// The process was terminated by a signal.
    Signalled,
}

/// Result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    /// Command label.
    pub name: String,

    pub status: ExecStatus,

    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,

    /// Set when `status` is `Failed`.
    pub cause: Option<FailureCause>,

    /// Captured stdout (empty when output was inherited).
    pub stdout: String,

    /// Captured stderr, or the launch/timeout error text.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ExecOutcome {
    /// Whether the command exited with code 0.
    pub fn passed(&self) -> bool {
        self.status == ExecStatus::Succeeded
    }

    /// Human-readable failure detail, if there is anything to show.
    pub fn diagnostic(&self) -> Option<String> {
        if self.passed() {
            return None;
        }
        let text = if !self.stderr.trim().is_empty() {
            self.stderr.trim().to_string()
        } else if !self.stdout.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            match (self.cause, self.exit_code) {
                (Some(FailureCause::NonZeroExit), Some(code)) => format!("exited with code {code}"),
                (Some(FailureCause::Signalled), _) => "terminated by signal".to_string(),
                _ => return None,
            }
        };
        Some(text)
    }

    fn spawn_failed(spec: &CommandSpec, err: std::io::Error, elapsed: Duration) -> Self {
        Self {
            name: spec.name.clone(),
            status: ExecStatus::Failed,
            exit_code: None,
            cause: Some(FailureCause::SpawnFailed),
            stdout: String::new(),
            stderr: format!("failed to launch {}: {}", spec.argv[0], err),
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    fn timed_out(spec: &CommandSpec, elapsed: Duration) -> Self {
        Self {
            name: spec.name.clone(),
            status: ExecStatus::Failed,
            exit_code: None,
            cause: Some(FailureCause::TimedOut),
            stdout: String::new(),
            stderr: format!("timed out after {} seconds", spec.timeout_secs),
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    fn from_output(spec: &CommandSpec, output: Output, elapsed: Duration) -> Self {
        let exit_code = output.status.code();
        let (status, cause) = if output.status.success() {
            (ExecStatus::Succeeded, None)
        } else if exit_code.is_some() {
            (ExecStatus::Failed, Some(FailureCause::NonZeroExit))
        } else {
            (ExecStatus::Failed, Some(FailureCause::Signalled))
        };

        Self {
            name: spec.name.clone(),
            status,
            exit_code,
            cause,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Run one command to completion.
///
/// Returns `Err` only for an empty command line (before anything is
/// spawned) or when the run is interrupted by Ctrl-C or, on Unix, SIGTERM.
/// The child is killed when the timeout expires or the signal arrives.
pub async fn execute(spec: &CommandSpec) -> Result<ExecOutcome> {
    let start = Instant::now();

    let Some((exe, args)) = spec.argv.split_first() else {
        return Err(TestgateError::InvalidCommand {
            name: spec.name.clone(),
            reason: "empty command line".to_string(),
        });
    };

    let mut command = Command::new(exe);
    command.args(args).kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }
    if spec.capture {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    }

    debug!(command = %spec.display(), name = %spec.name, "Spawning command");

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(name = %spec.name, error = %e, "Command could not be launched");
            return Ok(ExecOutcome::spawn_failed(spec, e, start.elapsed()));
        }
    };

    let limit = (spec.timeout_secs > 0).then(|| Duration::from_secs(spec.timeout_secs));

    // Dropping the wait future drops the child, which kills it.
    let output = tokio::select! {
        waited = wait_with_deadline(child, limit) => waited?,
        _ = termination_requested() => {
            warn!(name = %spec.name, "Interrupted, terminating child process");
            return Err(TestgateError::Interrupted(spec.name.clone()));
        }
    };

    let elapsed = start.elapsed();
    Ok(match output {
        Some(output) => ExecOutcome::from_output(spec, output, elapsed),
        None => {
            warn!(name = %spec.name, timeout_secs = spec.timeout_secs, "Command timed out");
            ExecOutcome::timed_out(spec, elapsed)
        }
    })
}

/// Resolves once the process is asked to stop.
///
/// A signal source that cannot be installed never resolves, so a broken
/// handler cannot abort a healthy run.
async fn termination_requested() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Wait for the child, yielding `None` when the deadline passes first.
async fn wait_with_deadline(
    child: Child,
    limit: Option<Duration>,
) -> std::io::Result<Option<Output>> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output.map(Some),
            Err(_) => Ok(None),
        },
        None => child.wait_with_output().await.map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> CommandSpec {
        CommandSpec::new(
            name,
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        )
        .captured()
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let spec = CommandSpec::new("echo_test", vec!["echo".to_string(), "hello".to_string()])
            .captured();

        let outcome = execute(&spec).await.expect("execute failed");
        assert!(outcome.passed());
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.cause.is_none());
        assert!(outcome.stdout.contains("hello"));
        assert!(outcome.diagnostic().is_none());
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let outcome = execute(&sh("exit_3", "echo boom >&2; exit 3"))
            .await
            .expect("execute failed");
        assert!(!outcome.passed());
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.cause, Some(FailureCause::NonZeroExit));
        assert_eq!(outcome.diagnostic().as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_missing_executable_is_failed_outcome() {
        let spec = CommandSpec::new(
            "missing",
            vec!["testgate-definitely-not-installed".to_string()],
        );

        let outcome = execute(&spec).await.expect("spawn failure must not be an error");
        assert!(!outcome.passed());
        assert_eq!(outcome.cause, Some(FailureCause::SpawnFailed));
        assert!(outcome.exit_code.is_none());
        assert!(outcome.stderr.contains("failed to launch"));
    }

    #[tokio::test]
    async fn test_empty_argv_is_configuration_error() {
        let spec = CommandSpec::new("empty", vec![]);
        let err = execute(&spec).await.unwrap_err();
        assert!(matches!(err, TestgateError::InvalidCommand { .. }));
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_timeout_kills_and_fails() {
        let spec = sh("sleeper", "sleep 5").with_timeout(1);
        let outcome = execute(&spec).await.expect("execute failed");
        assert!(!outcome.passed());
        assert_eq!(outcome.cause, Some(FailureCause::TimedOut));
        assert!(outcome.duration_ms < 5000);
    }

    #[tokio::test]
    async fn test_working_dir_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();

        let outcome = execute(&sh("cat_marker", "cat marker.txt").in_dir(dir.path()))
            .await
            .expect("execute failed");
        assert!(outcome.passed());
        assert_eq!(outcome.stdout, "here");
    }

    #[test]
    fn test_display_joins_argv() {
        let spec = CommandSpec::new(
            "e2e",
            vec!["npm".to_string(), "run".to_string(), "test:e2e".to_string()],
        );
        assert_eq!(spec.display(), "npm run test:e2e");
        assert_eq!(spec.timeout_secs, 0);
        assert!(!spec.capture);
    }
}
