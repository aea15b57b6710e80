//! Run context, run state machine and in-progress run bookkeeping.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::NucleusConfig;

use super::outcome::{
    CoverageSummary, OutcomeStatus, PipelineOutcome, ReportStatus, StageRecord, StageStatus,
};
use super::test_case::{ExecutionResult, TestId};

/// The eight stages, in their fixed execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Fetch,
    Configure,
    Diff,
    Discover,
    Filter,
    Execute,
    Collect,
    Report,
}

impl StageKind {
    pub const ORDER: [StageKind; 8] = [
        StageKind::Fetch,
        StageKind::Configure,
        StageKind::Diff,
        StageKind::Discover,
        StageKind::Filter,
        StageKind::Execute,
        StageKind::Collect,
        StageKind::Report,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Configure => "configure",
            Self::Diff => "diff",
            Self::Discover => "discover",
            Self::Filter => "filter",
            Self::Execute => "execute",
            Self::Collect => "collect",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Baseline/head overrides taken from the configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Revisions {
    pub base: Option<String>,
    pub head: Option<String>,
}

/// Process-wide context shared read-only with every stage
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,

    /// Shared cancellation signal; the only shutdown channel
    pub cancel: CancellationToken,

    pub config: Arc<NucleusConfig>,

    pub revisions: Revisions,
}

impl RunContext {
    pub fn new(config: Arc<NucleusConfig>, cancel: CancellationToken) -> Self {
        let revisions = Revisions {
            base: config.base_commit.clone(),
            head: config.head_commit.clone(),
        };
        Self {
            run_id: Uuid::new_v4(),
            cancel,
            config,
            revisions,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// State machine of one orchestrator run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    NotStarted,
    Running { stage_index: usize, stage: StageKind },
    Completed,
    FatalAborted,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::FatalAborted | Self::Cancelled)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunStateError {
    #[error("run already finished as {0:?}")]
    AlreadyFinished(RunState),

    #[error("{0:?} is not a terminal state")]
    NotTerminal(RunState),
}

/// In-progress run: state plus the material the outcome is built from
#[derive(Debug, Clone)]
pub struct Run {
    pub id: Uuid,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageRecord>,
    pub errors: Vec<String>,
    pub blocked: Vec<TestId>,
    pub results: Vec<ExecutionResult>,
    pub coverage: Option<CoverageSummary>,
}

impl Run {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            state: RunState::NotStarted,
            started_at: Utc::now(),
            stages: StageKind::ORDER.iter().copied().map(StageRecord::pending).collect(),
            errors: Vec::new(),
            blocked: Vec::new(),
            results: Vec::new(),
            coverage: None,
        }
    }

    fn record_mut(&mut self, stage: StageKind) -> &mut StageRecord {
        &mut self.stages[stage.index()]
    }

    /// Enter a stage; a finished run keeps its terminal state (reporting)
    pub fn begin(&mut self, stage: StageKind) {
        if !self.state.is_terminal() {
            self.state = RunState::Running {
                stage_index: stage.index(),
                stage,
            };
        }
        self.record_mut(stage).status = StageStatus::Running;
    }

    /// Mark a stage finished with `status`
    pub fn end(&mut self, stage: StageKind, status: StageStatus, duration_ms: u64) {
        match &status {
            StageStatus::Degraded { reason } => {
                self.errors.push(format!("{}: degraded: {}", stage, reason))
            }
            StageStatus::Failed { error } => self.errors.push(format!("{}: {}", stage, error)),
            _ => {}
        }
        let record = self.record_mut(stage);
        record.status = status;
        record.duration_ms = Some(duration_ms);
    }

    /// Mark every stage that never ran (excluding `Report`) as skipped
    pub fn skip_pending(&mut self) {
        for record in &mut self.stages {
            if record.stage != StageKind::Report && record.status == StageStatus::Pending {
                record.status = StageStatus::Skipped;
            }
        }
    }

    /// Move to a terminal state; a run finishes exactly once
    pub fn finish(&mut self, terminal: RunState) -> Result<(), RunStateError> {
        if self.state.is_terminal() {
            return Err(RunStateError::AlreadyFinished(self.state.clone()));
        }
        if !terminal.is_terminal() {
            return Err(RunStateError::NotTerminal(terminal));
        }
        self.state = terminal;
        Ok(())
    }

    pub fn is_degraded(&self) -> bool {
        self.stages
            .iter()
            .any(|r| matches!(r.status, StageStatus::Degraded { .. }))
    }

    /// Build the outcome from a finished run
    pub fn finalize(&self) -> PipelineOutcome {
        let status = match self.state {
            RunState::FatalAborted => OutcomeStatus::Failed,
            RunState::Cancelled => OutcomeStatus::Cancelled,
            _ if self.is_degraded() => OutcomeStatus::Degraded,
            _ => OutcomeStatus::Completed,
        };

        PipelineOutcome {
            run_id: self.id,
            status,
            stages: self.stages.clone(),
            errors: self.errors.clone(),
            blocked: self.blocked.clone(),
            results: self.results.clone(),
            tests_run: self.results.len(),
            coverage: self.coverage.clone(),
            started_at: self.started_at,
            completed_at: Utc::now(),
            report: ReportStatus::Pending,
        }
    }
}
