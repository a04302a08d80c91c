//! Repeated-run harness for surfacing flaky tests.
//!
//! Runs one task N times, strictly one after another, and stops at the
//! first failing iteration unless told to keep going.

use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use testgate_core::{ExecOutcome, ExecStatus, Result, Task, TaskExecutor, TestgateError};
use tracing::{info, warn};

/// Iterations used when nothing else is configured.
pub const DEFAULT_ITERATIONS: u32 = 10;

/// Task a burn-in runs when nothing else is configured.
pub fn default_task() -> Task {
    Task::script("test:e2e")
}

/// A validated, strictly positive iteration count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct IterationCount(u32);

impl IterationCount {
    /// Reject zero, negative and out-of-range counts.
    pub fn new(count: i64) -> Result<Self> {
        match u32::try_from(count) {
            Ok(n) if n > 0 => Ok(Self(n)),
            _ => Err(TestgateError::InvalidIterationCount(count)),
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for IterationCount {
    fn default() -> Self {
        Self(DEFAULT_ITERATIONS)
    }
}

impl TryFrom<i64> for IterationCount {
    type Error = TestgateError;

    fn try_from(count: i64) -> Result<Self> {
        Self::new(count)
    }
}

impl From<NonZeroU32> for IterationCount {
    fn from(count: NonZeroU32) -> Self {
        Self(count.get())
    }
}

impl From<IterationCount> for u32 {
    fn from(count: IterationCount) -> u32 {
        count.0
    }
}

impl FromStr for IterationCount {
    type Err = TestgateError;

    fn from_str(s: &str) -> Result<Self> {
        let count: i64 = s.trim().parse().map_err(|_| {
            TestgateError::Config(format!(
                "invalid iteration count {s:?}: must be a positive integer"
            ))
        })?;
        Self::new(count)
    }
}

/// Outcome of a single iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    /// 1-based iteration number.
    pub iteration: u32,

    pub status: ExecStatus,

    /// Failure detail passed through from the command, if any.
    pub diagnostic: Option<String>,

    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn from_exec(iteration: u32, outcome: &ExecOutcome) -> Self {
        Self {
            iteration,
            status: outcome.status,
            diagnostic: outcome.diagnostic(),
            duration_ms: outcome.duration_ms,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ExecStatus::Succeeded
    }
}

/// Overall verdict of a burn-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    AllPassed,
    FlakyDetected,
}

/// Pass/fail tallies over the iterations actually executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    /// Iterations requested.
    pub requested: u32,

    pub succeeded: u32,

    pub failed: u32,

    /// Iteration numbers that failed, ascending.
    pub failed_iterations: Vec<u32>,

    pub verdict: Verdict,
}

impl AggregateResult {
    pub fn new(requested: u32) -> Self {
        Self {
            requested,
            succeeded: 0,
            failed: 0,
            failed_iterations: Vec::new(),
            verdict: Verdict::AllPassed,
        }
    }

    /// Fold one iteration into the tallies.
    pub fn record(&mut self, run: &RunOutcome) {
        if run.passed() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            self.failed_iterations.push(run.iteration);
            self.verdict = Verdict::FlakyDetected;
        }
    }

    /// Iterations that ran (may be fewer than requested after a fail-fast).
    pub fn executed(&self) -> u32 {
        self.succeeded + self.failed
    }

    pub fn first_failure(&self) -> Option<u32> {
        self.failed_iterations.first().copied()
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::AllPassed
    }

    /// One-line summary for the end of a run.
    pub fn summary_line(&self) -> String {
        match (self.verdict, self.first_failure()) {
            (Verdict::AllPassed, _) => format!("{}/{} passed", self.succeeded, self.requested),
            (Verdict::FlakyDetected, Some(k)) if self.executed() < self.requested || self.failed == 1 => {
                format!("failed on iteration {}/{}", k, self.requested)
            }
            (Verdict::FlakyDetected, _) => format!(
                "{}/{} failed (iterations {})",
                self.failed,
                self.requested,
                self.failed_iterations
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// Runs a task repeatedly and aggregates the outcomes.
#[derive(Debug, Clone)]
pub struct BurnInHarness {
    /// Label prefix for each iteration's command.
    pub name: String,

    pub iterations: IterationCount,

    /// Run every iteration even after a failure, to measure a flake rate.
    pub keep_going: bool,
}

impl BurnInHarness {
    pub fn new(iterations: IterationCount) -> Self {
        Self {
            name: "burn_in".to_string(),
            iterations,
            keep_going: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    pub async fn run(&self, executor: &dyn TaskExecutor, task: &Task) -> Result<AggregateResult> {
        self.run_observed(executor, task, |_| {}).await
    }

    /// Run the burn-in, calling `on_iteration` after every iteration.
    ///
    /// Iterations are numbered from 1 and never overlap. An interrupt from
    /// the executor aborts the loop and is returned as an error.
    pub async fn run_observed<F>(
        &self,
        executor: &dyn TaskExecutor,
        task: &Task,
        mut on_iteration: F,
    ) -> Result<AggregateResult>
    where
        F: FnMut(&RunOutcome) + Send,
    {
        let total = self.iterations.get();
        let mut aggregate = AggregateResult::new(total);

        info!(task = %task, iterations = total, keep_going = self.keep_going, "Starting burn-in");

        for iteration in 1..=total {
            let name = format!("{}#{}", self.name, iteration);
            let outcome = executor.run_task(&name, task).await?;
            let run = RunOutcome::from_exec(iteration, &outcome);

            if run.passed() {
                info!(iteration, total, duration_ms = run.duration_ms, "Iteration passed");
            } else {
                warn!(iteration, total, cause = ?outcome.cause, "Iteration failed");
            }

            aggregate.record(&run);
            on_iteration(&run);

            if !run.passed() && !self.keep_going {
                warn!(iteration, total, "Stopping burn-in at first failure");
                break;
            }
        }

        info!(summary = %aggregate.summary_line(), "Burn-in finished");
        Ok(aggregate)
    }
}
