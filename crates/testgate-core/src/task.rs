//! Named tasks and the executors that run them.
//!
//! The burn-in harness, the selector and the local CI pipeline only know
//! about [`Task`]s and a [`TaskExecutor`]. Turning a task into a concrete
//! command line is the adapter's job, so none of them depend on a
//! particular package manager's conventions.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TestgateError};
use crate::exec::{self, CommandSpec, ExecOutcome};

/// Something to run: a package-manager script or a raw command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Task {
    /// A named script, optionally scoped to one sub-project.
    Script {
        script: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace: Option<String>,
    },

    /// A command line passed through untouched.
    Exec { exec: Vec<String> },
}

impl Task {
    pub fn script(script: impl Into<String>) -> Self {
        Task::Script {
            script: script.into(),
            workspace: None,
        }
    }

    pub fn script_in(script: impl Into<String>, workspace: impl Into<String>) -> Self {
        Task::Script {
            script: script.into(),
            workspace: Some(workspace.into()),
        }
    }

    pub fn exec<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Task::Exec {
            exec: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command line on whitespace into an `Exec` task.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let argv: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            return Err(TestgateError::InvalidCommand {
                name: "command".to_string(),
                reason: "command line is empty".to_string(),
            });
        }
        Ok(Task::Exec { exec: argv })
    }

    /// Short label for logs and reports.
    pub fn label(&self) -> String {
        match self {
            Task::Script {
                script,
                workspace: Some(ws),
            } => format!("{ws}:{script}"),
            Task::Script {
                script,
                workspace: None,
            } => script.clone(),
            Task::Exec { exec } => exec.join(" "),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Package managers whose script runners we know how to drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Npm,
    Pnpm,
    Yarn,
}

impl PackageManager {
    pub fn binary(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Yarn => "yarn",
        }
    }

    /// Command line that runs `script`, scoped to `workspace` when given.
    pub fn script_argv(&self, script: &str, workspace: Option<&str>) -> Vec<String> {
        let mut argv = vec![self.binary().to_string()];
        match (self, workspace) {
            (PackageManager::Npm, ws) => {
                argv.extend(["run".to_string(), script.to_string()]);
                if let Some(ws) = ws {
                    argv.push(format!("--workspace={ws}"));
                }
            }
            (PackageManager::Pnpm, ws) => {
                if let Some(ws) = ws {
                    argv.extend(["--filter".to_string(), ws.to_string()]);
                }
                argv.extend(["run".to_string(), script.to_string()]);
            }
            (PackageManager::Yarn, ws) => {
                if let Some(ws) = ws {
                    argv.extend(["workspace".to_string(), ws.to_string()]);
                }
                argv.extend(["run".to_string(), script.to_string()]);
            }
        }
        argv
    }
}

impl FromStr for PackageManager {
    type Err = TestgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "npm" => Ok(PackageManager::Npm),
            "pnpm" => Ok(PackageManager::Pnpm),
            "yarn" => Ok(PackageManager::Yarn),
            other => Err(TestgateError::Config(format!(
                "unknown package manager: {other} (expected npm, pnpm or yarn)"
            ))),
        }
    }
}

/// Anything that can run a named task and report how it went.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run `task` to completion. `name` labels the run in logs and outcomes.
    async fn run_task(&self, name: &str, task: &Task) -> Result<ExecOutcome>;
}

/// Executor that spawns real processes through [`exec::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTaskExecutor {
    pub package_manager: PackageManager,

    /// Per-command wall-clock limit in seconds. 0 disables it.
    pub timeout_secs: u64,

    /// Capture output instead of streaming it to the terminal.
    pub capture: bool,

    pub working_dir: Option<PathBuf>,
}

impl CommandTaskExecutor {
    pub fn new(package_manager: PackageManager) -> Self {
        Self {
            package_manager,
            ..Self::default()
        }
    }

    /// Resolve a task into the command line this executor would spawn.
    pub fn command_for(&self, name: &str, task: &Task) -> CommandSpec {
        let argv = match task {
            Task::Script { script, workspace } => self
                .package_manager
                .script_argv(script, workspace.as_deref()),
            Task::Exec { exec } => exec.clone(),
        };

        let mut spec = CommandSpec::new(name, argv).with_timeout(self.timeout_secs);
        spec.capture = self.capture;
        spec.working_dir = self.working_dir.clone();
        spec
    }
}

#[async_trait]
impl TaskExecutor for CommandTaskExecutor {
    async fn run_task(&self, name: &str, task: &Task) -> Result<ExecOutcome> {
        exec::execute(&self.command_for(name, task)).await
    }
}
