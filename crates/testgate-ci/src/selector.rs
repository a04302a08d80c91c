//! Change-scoped test selection.
//!
//! Scope rules are an ordered list of (matchers, scope, task) entries,
//! each evaluated independently against every changed path. A path may
//! trigger several scopes; a scope runs once however many paths hit it.

use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use testgate_core::{ExecOutcome, Result, Task, TaskExecutor, TestgateError};
use tracing::{info, warn};

use crate::changes::{ChangeDetection, ChangeSet};

/// Predicate over a repository-relative path.
#[derive(Debug, Clone)]
pub enum Matcher {
    Prefix(String),
    Pattern(Regex),
}

impl Matcher {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Matcher::Prefix(prefix.into())
    }

    /// Compile a regex matcher. `scope` is only used in the error.
    pub fn pattern(scope: &str, pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Matcher::Pattern)
            .map_err(|e| TestgateError::InvalidPattern {
                scope: scope.to_string(),
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Matcher::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Matcher::Pattern(re) => re.is_match(path),
        }
    }
}

/// A named scope: the paths that belong to it and the task that tests it.
#[derive(Debug, Clone)]
pub struct ScopeRule {
    pub scope: String,
    pub matchers: Vec<Matcher>,
    pub task: Task,
}

impl ScopeRule {
    pub fn new(scope: impl Into<String>, task: Task) -> Self {
        Self {
            scope: scope.into(),
            matchers: Vec::new(),
            task,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.matchers.push(Matcher::prefix(prefix));
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        self.matchers.push(Matcher::pattern(&self.scope, pattern)?);
        Ok(self)
    }

    /// True when any matcher accepts the path.
    pub fn matches(&self, path: &str) -> bool {
        self.matchers.iter().any(|m| m.matches(path))
    }
}

/// What to do when files changed but none belongs to a known scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnmatchedPolicy {
    /// Note it and run nothing.
    #[default]
    Skip,
    /// Run the full suite.
    RunAll,
}

impl FromStr for UnmatchedPolicy {
    type Err = TestgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(UnmatchedPolicy::Skip),
            "run-all" | "run_all" => Ok(UnmatchedPolicy::RunAll),
            other => Err(TestgateError::Config(format!(
                "unknown unmatched policy: {other} (expected skip or run-all)"
            ))),
        }
    }
}

/// Rules plus the fallbacks the selector needs.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Evaluated in declaration order; that order is also run order.
    pub rules: Vec<ScopeRule>,

    /// Task run when changes are empty, unknown or a full run is forced.
    pub full_suite: Task,

    pub unmatched: UnmatchedPolicy,
}

impl SelectorConfig {
    /// Rules for a typical backend/frontend/e2e monorepo. Changes to the
    /// auth, checkout and payment flows also trigger the critical
    /// end-to-end suite.
    pub fn default_rules() -> Vec<ScopeRule> {
        vec![
            ScopeRule::new("backend", Task::script_in("test", "backend"))
                .with_prefix("packages/backend/"),
            ScopeRule::new("frontend", Task::script_in("test", "frontend"))
                .with_prefix("packages/frontend/"),
            ScopeRule::new("e2e-critical", Task::script("test:e2e"))
                .with_prefix("e2e/")
                .with_prefix("packages/backend/src/auth/")
                .with_prefix("packages/frontend/src/checkout/")
                .with_prefix("packages/backend/src/payment/"),
        ]
    }

    pub fn default_full_suite() -> Task {
        Task::script("test")
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            rules: Self::default_rules(),
            full_suite: Self::default_full_suite(),
            unmatched: UnmatchedPolicy::default(),
        }
    }
}

/// Why the full suite was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FullSuiteReason {
    NoChanges,
    ChangesUnavailable,
    Forced,
    UnmatchedChanges,
}

/// A scope hit by at least one changed path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggeredScope {
    pub scope: String,
    pub task: Task,
    pub matched_paths: Vec<String>,
}

/// What the selector decided to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionPlan {
    FullSuite {
        reason: FullSuiteReason,
        task: Task,
    },
    Scoped {
        scopes: Vec<TriggeredScope>,
        /// Changed paths that belong to no scope.
        unmatched: Vec<String>,
    },
    NothingToRun {
        unmatched: Vec<String>,
    },
}

impl SelectionPlan {
    /// `(label, task)` pairs in execution order.
    pub fn commands(&self) -> Vec<(String, Task)> {
        match self {
            SelectionPlan::FullSuite { task, .. } => vec![("full-suite".to_string(), task.clone())],
            SelectionPlan::Scoped { scopes, .. } => scopes
                .iter()
                .map(|s| (s.scope.clone(), s.task.clone()))
                .collect(),
            SelectionPlan::NothingToRun { .. } => Vec::new(),
        }
    }
}

/// Outcome of one triggered command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeOutcome {
    pub scope: String,
    pub outcome: ExecOutcome,
}

/// Everything the selector ran and whether it all passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionResult {
    pub plan: SelectionPlan,
    pub outcomes: Vec<ScopeOutcome>,
    pub success: bool,
}

impl SelectionResult {
    pub fn failed_scopes(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.outcome.passed())
            .map(|o| o.scope.as_str())
            .collect()
    }
}

/// Maps a change set onto scope commands and runs them.
#[derive(Debug, Clone, Default)]
pub struct ChangeSelector {
    pub config: SelectorConfig,

    /// Run the full suite regardless of what changed.
    pub force_full: bool,
}

impl ChangeSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            config,
            force_full: false,
        }
    }

    pub fn force_full(mut self, force_full: bool) -> Self {
        self.force_full = force_full;
        self
    }

    /// Classify a change set. Pure; runs nothing.
    pub fn plan(&self, changes: &ChangeSet) -> SelectionPlan {
        if self.force_full {
            return self.full_suite(FullSuiteReason::Forced);
        }
        if changes.is_empty() {
            return self.full_suite(FullSuiteReason::NoChanges);
        }

        let scopes: Vec<TriggeredScope> = self
            .config
            .rules
            .iter()
            .filter_map(|rule| {
                let matched: Vec<String> = changes
                    .iter()
                    .filter(|p| rule.matches(p))
                    .map(str::to_string)
                    .collect();
                (!matched.is_empty()).then(|| TriggeredScope {
                    scope: rule.scope.clone(),
                    task: rule.task.clone(),
                    matched_paths: matched,
                })
            })
            .collect();

        let unmatched: Vec<String> = changes
            .iter()
            .filter(|p| !self.config.rules.iter().any(|r| r.matches(p)))
            .map(str::to_string)
            .collect();

        if !scopes.is_empty() {
            return SelectionPlan::Scoped { scopes, unmatched };
        }

        match self.config.unmatched {
            UnmatchedPolicy::Skip => SelectionPlan::NothingToRun { unmatched },
            UnmatchedPolicy::RunAll => self.full_suite(FullSuiteReason::UnmatchedChanges),
        }
    }

    /// Plan from a detection result; unknown changes mean a full run.
    pub fn plan_for(&self, detection: &ChangeDetection) -> SelectionPlan {
        match detection.changes() {
            Some(changes) => self.plan(changes),
            None if self.force_full => self.full_suite(FullSuiteReason::Forced),
            None => self.full_suite(FullSuiteReason::ChangesUnavailable),
        }
    }

    pub async fn run(
        &self,
        executor: &dyn TaskExecutor,
        detection: &ChangeDetection,
    ) -> Result<SelectionResult> {
        self.run_observed(executor, detection, |_| {}).await
    }

    /// Run every planned command in order, calling `on_scope` after each.
    ///
    /// A failing scope does not stop the others; only an interrupt does.
    pub async fn run_observed<F>(
        &self,
        executor: &dyn TaskExecutor,
        detection: &ChangeDetection,
        mut on_scope: F,
    ) -> Result<SelectionResult>
    where
        F: FnMut(&ScopeOutcome) + Send,
    {
        let plan = self.plan_for(detection);
        info!(changes = %detection.describe(), "Selecting test scopes");

        match &plan {
            SelectionPlan::FullSuite { reason, task } => {
                info!(reason = ?reason, task = %task, "Running full suite")
            }
            SelectionPlan::Scoped { scopes, unmatched } => info!(
                scopes = ?scopes.iter().map(|s| s.scope.as_str()).collect::<Vec<_>>(),
                unmatched = unmatched.len(),
                "Running triggered scopes"
            ),
            SelectionPlan::NothingToRun { unmatched } => info!(
                unmatched = unmatched.len(),
                "No test scope matched the changed files; skipping tests"
            ),
        }

        let mut outcomes = Vec::new();
        for (scope, task) in plan.commands() {
            let outcome = executor.run_task(&scope, &task).await?;
            if outcome.passed() {
                info!(scope = %scope, duration_ms = outcome.duration_ms, "Scope passed");
            } else {
                warn!(scope = %scope, exit_code = ?outcome.exit_code, "Scope failed");
            }
            let scope_outcome = ScopeOutcome { scope, outcome };
            on_scope(&scope_outcome);
            outcomes.push(scope_outcome);
        }

        let success = outcomes.iter().all(|o| o.outcome.passed());
        Ok(SelectionResult {
            plan,
            outcomes,
            success,
        })
    }

    fn full_suite(&self, reason: FullSuiteReason) -> SelectionPlan {
        SelectionPlan::FullSuite {
            reason,
            task: self.config.full_suite.clone(),
        }
    }
}
