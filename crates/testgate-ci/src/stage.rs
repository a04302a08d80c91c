//! Local CI stage definitions and configuration.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use testgate_core::Task;

use crate::burn_in::{self, IterationCount};

/// Iterations for the burn-in stage of a local CI run.
pub const LOCAL_BURN_IN_ITERATIONS: NonZeroU32 = match NonZeroU32::new(3) {
    Some(n) => n,
    None => panic!("burn-in iterations must be non-zero"),
};

/// Builtin local CI stages, in the order CI runs them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// `lint` script
    Lint,

    /// `test` script
    UnitTests,

    /// `test:e2e` script
    E2eTests,

    /// `test:e2e` repeated a few times
    BurnIn,
}

impl BuiltinStage {
    pub const ALL: [BuiltinStage; 4] = [
        BuiltinStage::Lint,
        BuiltinStage::UnitTests,
        BuiltinStage::E2eTests,
        BuiltinStage::BurnIn,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::Lint => "lint",
            BuiltinStage::UnitTests => "unit",
            BuiltinStage::E2eTests => "e2e",
            BuiltinStage::BurnIn => "burn_in",
        }
    }

    /// Get the task the stage runs.
    pub fn task(&self) -> Task {
        match self {
            BuiltinStage::Lint => Task::script("lint"),
            BuiltinStage::UnitTests => Task::script("test"),
            BuiltinStage::E2eTests | BuiltinStage::BurnIn => burn_in::default_task(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

/// What a stage does when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageKind {
    /// Run a task once.
    Task { task: Task },

    /// Run a task repeatedly through the burn-in harness.
    BurnIn {
        task: Task,
        iterations: IterationCount,
    },
}

/// Configuration for a local CI stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    pub kind: StageKind,

    /// Whether this stage is enabled.
    pub enabled: bool,
}

impl StageConfig {
    /// Create a stage configuration from a builtin stage.
    pub fn from_builtin(stage: BuiltinStage, burn_in_iterations: IterationCount) -> Self {
        let kind = match stage {
            BuiltinStage::BurnIn => StageKind::BurnIn {
                task: stage.task(),
                iterations: burn_in_iterations,
            },
            _ => StageKind::Task { task: stage.task() },
        };
        Self {
            name: stage.name().to_string(),
            kind,
            enabled: true,
        }
    }

    /// Create a custom single-run stage.
    pub fn custom(name: impl Into<String>, task: Task) -> Self {
        Self {
            name: name.into(),
            kind: StageKind::Task { task },
            enabled: true,
        }
    }

    /// Create a custom burn-in stage.
    pub fn burn_in(name: impl Into<String>, task: Task, iterations: IterationCount) -> Self {
        Self {
            name: name.into(),
            kind: StageKind::BurnIn { task, iterations },
            enabled: true,
        }
    }

    /// Disable this stage.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn task(&self) -> &Task {
        match &self.kind {
            StageKind::Task { task } | StageKind::BurnIn { task, .. } => task,
        }
    }
}

/// lint, unit, e2e, then a short burn-in.
pub fn default_stages(burn_in_iterations: IterationCount) -> Vec<StageConfig> {
    BuiltinStage::ALL
        .into_iter()
        .map(|stage| StageConfig::from_builtin(stage, burn_in_iterations))
        .collect()
}

/// Burn-in count used by `default_stages` unless configured.
pub fn local_burn_in_iterations() -> IterationCount {
    IterationCount::from(LOCAL_BURN_IN_ITERATIONS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_stage_names() {
        assert_eq!(BuiltinStage::Lint.name(), "lint");
        assert_eq!(BuiltinStage::UnitTests.name(), "unit");
        assert_eq!(BuiltinStage::E2eTests.name(), "e2e");
        assert_eq!(BuiltinStage::BurnIn.name(), "burn_in");
        assert_eq!(BuiltinStage::from_name("e2e"), Some(BuiltinStage::E2eTests));
        assert_eq!(BuiltinStage::from_name("deploy"), None);
    }

    #[test]
    fn test_builtin_stage_tasks() {
        assert_eq!(BuiltinStage::Lint.task(), Task::script("lint"));
        assert_eq!(BuiltinStage::UnitTests.task(), Task::script("test"));
        assert_eq!(BuiltinStage::E2eTests.task(), Task::script("test:e2e"));
    }

    #[test]
    fn test_default_stages_order_and_burn_in() {
        let stages = default_stages(local_burn_in_iterations());
        let names: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["lint", "unit", "e2e", "burn_in"]);

        match &stages[3].kind {
            StageKind::BurnIn { iterations, .. } => assert_eq!(iterations.get(), 3),
            other => panic!("expected burn-in stage, got {other:?}"),
        }
        assert!(stages.iter().all(|s| s.enabled));
    }

    #[test]
    fn test_stage_config_custom() {
        let config = StageConfig::custom("typecheck", Task::exec(["npx", "tsc", "--noEmit"]));
        assert_eq!(config.name, "typecheck");
        assert_eq!(config.task().label(), "npx tsc --noEmit");
        assert!(config.enabled);
    }

    #[test]
    fn test_stage_config_disabled() {
        let config =
            StageConfig::from_builtin(BuiltinStage::Lint, IterationCount::default()).disabled();
        assert!(!config.enabled);
    }
}
