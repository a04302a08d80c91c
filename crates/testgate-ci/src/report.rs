//! JSON report artifacts for CI uploads.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use testgate_core::Result;
use uuid::Uuid;

use crate::burn_in::AggregateResult;
use crate::changes::ChangeDetection;
use crate::pipeline::PipelineResult;
use crate::selector::SelectionResult;

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// What was run, and how it went.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ReportBody {
    BurnIn {
        task: String,
        aggregate: AggregateResult,
    },
    Selective {
        detection: ChangeDetection,
        result: SelectionResult,
    },
    LocalCi {
        result: PipelineResult,
    },
}

impl ReportBody {
    pub fn success(&self) -> bool {
        match self {
            ReportBody::BurnIn { aggregate, .. } => aggregate.passed(),
            ReportBody::Selective { result, .. } => result.success,
            ReportBody::LocalCi { result } => result.success,
        }
    }
}

/// Report written with `--report <path>`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub run_id: Uuid,
    pub git_sha: Option<String>,
    pub success: bool,
    #[serde(flatten)]
    pub body: ReportBody,
}

impl RunReport {
    pub fn new(body: ReportBody, git_sha: Option<String>) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            run_id: Uuid::new_v4(),
            git_sha,
            success: body.success(),
            body,
        }
    }
}

/// Write the report as pretty JSON.
pub fn write_report_json(path: &Path, report: &RunReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report)?;
    std::fs::write(path, content)?;
    Ok(())
}
