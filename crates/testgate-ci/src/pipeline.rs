//! Local CI pipeline orchestration.
//!
//! Mirrors the remote CI locally: stages run in order and the first
//! failing stage halts the rest.

use std::time::Instant;

use serde::Serialize;
use testgate_core::{Result, TaskExecutor};
use tracing::{info, warn};

use crate::burn_in::{AggregateResult, BurnInHarness};
use crate::stage::{StageConfig, StageKind};

/// Result of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Whether the stage passed.
    pub success: bool,

    /// Exit code of a single-run stage.
    pub exit_code: Option<i32>,

    /// Tallies of a burn-in stage.
    pub burn_in: Option<AggregateResult>,

    /// Short human-readable outcome.
    pub summary: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl StageResult {
    pub fn passed(&self) -> bool {
        self.success
    }
}

/// Result of a complete local CI run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    /// Whether every enabled stage passed.
    pub success: bool,

    /// Results of the stages that ran, in order.
    pub stages: Vec<StageResult>,

    /// Disabled stages that were skipped.
    pub skipped: Vec<String>,

    /// Stage that failed and stopped the run.
    pub halted_at: Option<String>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineResult {
    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.passed()).count()
    }
}

/// Local CI pipeline orchestrator.
pub struct LocalCiPipeline;

impl LocalCiPipeline {
    pub async fn run(
        executor: &dyn TaskExecutor,
        stages: Vec<StageConfig>,
    ) -> Result<PipelineResult> {
        Self::run_observed(executor, stages, |_| {}).await
    }

    /// Execute the stages in order, calling `on_stage` after each one.
    ///
    /// Disabled stages are skipped. The first failing stage halts the
    /// pipeline; later stages are neither run nor reported.
    pub async fn run_observed<F>(
        executor: &dyn TaskExecutor,
        stages: Vec<StageConfig>,
        mut on_stage: F,
    ) -> Result<PipelineResult>
    where
        F: FnMut(&StageResult) + Send,
    {
        let start = Instant::now();
        info!(stages = stages.len(), "Starting local CI pipeline");

        let mut stage_results = Vec::new();
        let mut skipped = Vec::new();
        let mut halted_at = None;

        for config in stages {
            if !config.enabled {
                info!(stage = %config.name, "Skipping disabled stage");
                skipped.push(config.name);
                continue;
            }

            info!(stage = %config.name, task = %config.task(), "Executing stage");
            let result = Self::execute_stage(executor, &config).await?;
            on_stage(&result);

            let passed = result.passed();
            stage_results.push(result);

            if !passed {
                warn!(stage = %config.name, "Stage failed, halting pipeline");
                halted_at = Some(config.name);
                break;
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let success = halted_at.is_none();

        if success {
            info!(duration_ms, "Local CI pipeline completed successfully");
        } else {
            info!(duration_ms, "Local CI pipeline failed");
        }

        Ok(PipelineResult {
            success,
            stages: stage_results,
            skipped,
            halted_at,
            duration_ms,
        })
    }

    async fn execute_stage(
        executor: &dyn TaskExecutor,
        config: &StageConfig,
    ) -> Result<StageResult> {
        let start = Instant::now();

        match &config.kind {
            StageKind::Task { task } => {
                let outcome = executor.run_task(&config.name, task).await?;
                let summary = match (outcome.passed(), outcome.exit_code) {
                    (true, _) => "passed".to_string(),
                    (false, Some(code)) => format!("exit code {code}"),
                    (false, None) => outcome
                        .diagnostic()
                        .unwrap_or_else(|| "failed".to_string()),
                };
                Ok(StageResult {
                    stage_name: config.name.clone(),
                    success: outcome.passed(),
                    exit_code: outcome.exit_code,
                    burn_in: None,
                    summary,
                    duration_ms: outcome.duration_ms,
                })
            }
            StageKind::BurnIn { task, iterations } => {
                let aggregate = BurnInHarness::new(*iterations)
                    .named(config.name.clone())
                    .run(executor, task)
                    .await?;
                Ok(StageResult {
                    stage_name: config.name.clone(),
                    success: aggregate.passed(),
                    exit_code: None,
                    summary: aggregate.summary_line(),
                    burn_in: Some(aggregate),
                    duration_ms: start.elapsed().as_millis() as u64,
                })
            }
        }
    }
}
