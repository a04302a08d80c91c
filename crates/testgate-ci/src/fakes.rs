//! In-memory task executor for tests.
//!
//! `ScriptedExecutor` never spawns a process. It records every call and
//! answers with a pass or fail decided up front, so harness and selector
//! behavior can be checked without depending on the host's tooling.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use testgate_core::{ExecOutcome, ExecStatus, FailureCause, Result, Task, TaskExecutor};

/// Executor whose outcomes are scripted per call number or per task.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    failing_calls: HashSet<usize>,
    failing_tasks: HashSet<String>,
    calls: Mutex<Vec<(String, Task)>>,
}

impl ScriptedExecutor {
    /// An executor where every call passes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `call`-th invocation (1-based, across all tasks).
    pub fn fail_on_call(mut self, call: usize) -> Self {
        self.failing_calls.insert(call);
        self
    }

    /// Fail every invocation of the task with this label.
    pub fn fail_task(mut self, label: impl Into<String>) -> Self {
        self.failing_tasks.insert(label.into());
        self
    }

    /// Recorded `(name, task)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, Task)> {
        self.calls.lock().unwrap().clone()
    }

    /// Labels of the tasks that were run, in call order.
    pub fn task_labels(&self) -> Vec<String> {
        self.calls().iter().map(|(_, task)| task.label()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn run_task(&self, name: &str, task: &Task) -> Result<ExecOutcome> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((name.to_string(), task.clone()));
            calls.len()
        };

        let fails = self.failing_calls.contains(&call) || self.failing_tasks.contains(&task.label());
        Ok(ExecOutcome {
            name: name.to_string(),
            status: if fails {
                ExecStatus::Failed
            } else {
                ExecStatus::Succeeded
            },
            exit_code: Some(if fails { 1 } else { 0 }),
            cause: fails.then_some(FailureCause::NonZeroExit),
            stdout: String::new(),
            stderr: if fails {
                format!("scripted failure of {}", task.label())
            } else {
                String::new()
            },
            duration_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failures() {
        let executor = ScriptedExecutor::new().fail_on_call(2).fail_task("lint");
        let unit = Task::script("test");

        assert!(executor.run_task("a", &unit).await.unwrap().passed());
        assert!(!executor.run_task("b", &unit).await.unwrap().passed());
        assert!(executor.run_task("c", &unit).await.unwrap().passed());
        assert!(!executor.run_task("d", &Task::script("lint")).await.unwrap().passed());

        assert_eq!(executor.call_count(), 4);
        assert_eq!(executor.task_labels(), vec!["test", "test", "test", "lint"]);
    }
}
