//! testgate CI - test orchestration for CI and local runs
//!
//! Provides:
//! - A burn-in harness that reruns a test task to surface flakiness
//! - A selector that runs only the test scopes touched by a git diff
//! - A local CI pipeline (lint, unit, e2e, short burn-in)
//! - JSON reports for CI artifacts

pub mod burn_in;
pub mod changes;
pub mod config;
pub mod fakes;
pub mod pipeline;
pub mod report;
pub mod selector;
pub mod stage;

// Re-export key types
pub use burn_in::{AggregateResult, BurnInHarness, IterationCount, RunOutcome, Verdict};
pub use changes::{detect_changes, ChangeDetection, ChangeSet};
pub use config::TestgateConfig;
pub use pipeline::{LocalCiPipeline, PipelineResult, StageResult};
pub use report::{write_report_json, ReportBody, RunReport};
pub use selector::{
    ChangeSelector, FullSuiteReason, Matcher, ScopeOutcome, ScopeRule, SelectionPlan,
    SelectionResult, SelectorConfig, TriggeredScope, UnmatchedPolicy,
};
pub use stage::{BuiltinStage, StageConfig, StageKind};
