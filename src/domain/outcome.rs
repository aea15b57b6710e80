//! Pipeline outcome: the finalized, reported result of one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::StageKind;
use super::test_case::{ExecutionResult, TestId};

/// Aggregate status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every stage succeeded
    Completed,

    /// Run finished but at least one stage produced a partial result
    Degraded,

    /// A stage failed fatally
    Failed,

    /// Cancellation was requested before the run finished
    Cancelled,
}

impl OutcomeStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Status of a single stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Degraded { reason: String },
    Failed { error: String },
    Cancelled,
    Skipped,
}

impl StageStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// Per-stage bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageKind,

    #[serde(flatten)]
    pub status: StageStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl StageRecord {
    pub fn pending(stage: StageKind) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            duration_ms: None,
        }
    }
}

/// Coverage artifacts uploaded for the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSummary {
    /// Blob keys of uploaded (compressed) coverage files
    pub artifacts: Vec<String>,

    /// Uncompressed bytes uploaded
    pub total_bytes: u64,
}

/// Delivery of the final report to the control plane
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ReportStatus {
    #[default]
    Pending,
    Delivered,
    Failed { error: String },
}

/// Finalized result of one orchestrator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub run_id: Uuid,

    pub status: OutcomeStatus,

    /// One record per stage, in execution order
    pub stages: Vec<StageRecord>,

    /// Human-readable errors and degradations, in the order they happened
    pub errors: Vec<String>,

    /// Tests removed by the blocklist
    pub blocked: Vec<TestId>,

    pub results: Vec<ExecutionResult>,

    pub tests_run: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageSummary>,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Delivery state of this outcome; not part of the reported payload
    #[serde(skip)]
    pub report: ReportStatus,
}

impl PipelineOutcome {
    pub fn stage(&self, stage: StageKind) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Whether the process should exit non-zero for this run
    pub fn is_failure(&self) -> bool {
        self.status.is_failure() || matches!(self.report, ReportStatus::Failed { .. })
    }
}
