//! Pipeline orchestrator.
//!
//! Drives the eight stages in their fixed order, passing each stage's
//! output to the next, applies the per-stage error policy and sends exactly
//! one report per run. Stages are injected through [`OrchestratorBuilder`];
//! the orchestrator never constructs collaborators.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    PipelineOutcome, ReportStatus, Run, RunContext, RunState, StageKind, StageRecord, StageStatus,
};

use super::stage::{
    CollectStage, ConfigureStage, DiffStage, DiscoverStage, ExecuteStage, FetchStage,
    FilterStage, ReportStage, StageError, StageResult, Staged,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("no {0} stage configured")]
    MissingStage(StageKind),
}

/// Point-in-time view of a run, published on every transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub run_id: Option<Uuid>,
    #[serde(flatten)]
    pub state: RunState,
    pub stages: Vec<StageRecord>,
    pub updated_at: DateTime<Utc>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            run_id: None,
            state: RunState::NotStarted,
            stages: StageKind::ORDER.iter().copied().map(StageRecord::pending).collect(),
            updated_at: Utc::now(),
        }
    }
}

impl StatusSnapshot {
    fn of(run: &Run) -> Self {
        Self {
            run_id: Some(run.id),
            state: run.state.clone(),
            stages: run.stages.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// Why the stage sequence stopped early
enum Abort {
    Fatal,
    Cancelled,
}

pub struct Orchestrator {
    fetch: Arc<dyn FetchStage>,
    configure: Arc<dyn ConfigureStage>,
    diff: Arc<dyn DiffStage>,
    discover: Arc<dyn DiscoverStage>,
    filter: Arc<dyn FilterStage>,
    execute: Arc<dyn ExecuteStage>,
    collect: Arc<dyn CollectStage>,
    report: Arc<dyn ReportStage>,
    status: Option<watch::Sender<StatusSnapshot>>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Run the pipeline once and return its finalized outcome.
    ///
    /// Never fails: fatal stage errors and cancellation are part of the
    /// outcome, and the report stage runs in every case.
    #[instrument(skip(self, ctx), fields(run_id = %ctx.run_id))]
    pub async fn start(&self, ctx: &RunContext) -> PipelineOutcome {
        info!("Starting pipeline");

        let mut run = Run::new(ctx.run_id);
        self.publish(&run);

        let terminal = match self.run_stages(ctx, &mut run).await {
            Ok(()) => RunState::Completed,
            Err(Abort::Fatal) => RunState::FatalAborted,
            Err(Abort::Cancelled) => RunState::Cancelled,
        };

        if terminal != RunState::Completed {
            run.skip_pending();
        }
        if let Err(e) = run.finish(terminal) {
            warn!(error = %e, "Run state already final");
        }

        let mut outcome = run.finalize();
        outcome.report = self.send_report(ctx, &mut run, &outcome).await;
        outcome.stages = run.stages.clone();
        outcome.errors = run.errors.clone();

        info!(
            status = ?outcome.status,
            tests_run = outcome.tests_run,
            blocked = outcome.blocked.len(),
            "Pipeline finished"
        );
        outcome
    }

    async fn run_stages(&self, ctx: &RunContext, run: &mut Run) -> Result<(), Abort> {
        let payload = self
            .step(ctx, run, StageKind::Fetch, || self.fetch.fetch(ctx))
            .await?;

        let tas = self
            .step(ctx, run, StageKind::Configure, || {
                self.configure.configure(ctx, &payload)
            })
            .await?;

        let selection = self
            .step(ctx, run, StageKind::Diff, || self.diff.select(ctx, &payload, &tas))
            .await?;

        let impacted = self
            .step(ctx, run, StageKind::Discover, || {
                self.discover.discover(ctx, &payload, &tas, selection)
            })
            .await?;

        let filtered = self
            .step(ctx, run, StageKind::Filter, || {
                self.filter.filter(ctx, &payload, impacted)
            })
            .await?;
        run.blocked = filtered.blocked;

        let tests = filtered.tests;
        let results = self
            .step(ctx, run, StageKind::Execute, || {
                self.execute.execute(ctx, &payload, &tas, tests)
            })
            .await?;
        run.results = results.clone();

        let coverage = self
            .step(ctx, run, StageKind::Collect, || {
                self.collect.collect(ctx, &payload, &tas, &results)
            })
            .await?;
        run.coverage = Some(coverage);

        Ok(())
    }

    /// Check cancellation, invoke one stage and record how it ended
    async fn step<T, F, Fut>(
        &self,
        ctx: &RunContext,
        run: &mut Run,
        kind: StageKind,
        invoke: F,
    ) -> Result<T, Abort>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StageResult<T>>,
    {
        if ctx.is_cancelled() {
            info!(stage = %kind, "Cancellation requested, not starting stage");
            return Err(Abort::Cancelled);
        }

        run.begin(kind);
        self.publish(run);
        debug!(stage = %kind, "Stage started");

        let started = Instant::now();
        let result = invoke().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let next = match result {
            Ok(Staged {
                value,
                degraded: None,
            }) => {
                info!(stage = %kind, duration_ms, "Stage completed");
                run.end(kind, StageStatus::Completed, duration_ms);
                Ok(value)
            }
            Ok(Staged {
                value,
                degraded: Some(reason),
            }) => {
                warn!(stage = %kind, duration_ms, %reason, "Stage degraded");
                run.end(kind, StageStatus::Degraded { reason }, duration_ms);
                Ok(value)
            }
            Err(StageError::Fatal(err)) => {
                error!(stage = %kind, duration_ms, error = %err, "Stage failed");
                run.end(kind, StageStatus::Failed { error: err }, duration_ms);
                Err(Abort::Fatal)
            }
            Err(StageError::Cancelled) => {
                info!(stage = %kind, duration_ms, "Stage cancelled");
                run.end(kind, StageStatus::Cancelled, duration_ms);
                Err(Abort::Cancelled)
            }
        };

        self.publish(run);
        next
    }

    /// The report stage is exempt from the cancellation check
    async fn send_report(
        &self,
        ctx: &RunContext,
        run: &mut Run,
        outcome: &PipelineOutcome,
    ) -> ReportStatus {
        run.begin(StageKind::Report);
        self.publish(run);

        let started = Instant::now();
        let result = self.report.report(ctx, outcome).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, delivery) = match result {
            Ok(Staged { degraded: None, .. }) => {
                info!(duration_ms, "Report delivered");
                (StageStatus::Completed, ReportStatus::Delivered)
            }
            Ok(Staged {
                degraded: Some(reason),
                ..
            }) => {
                warn!(duration_ms, %reason, "Report delivered with degradation");
                (StageStatus::Degraded { reason }, ReportStatus::Delivered)
            }
            Err(e) => {
                let error = e.to_string();
                error!(duration_ms, %error, "Report could not be delivered");
                (
                    StageStatus::Failed {
                        error: error.clone(),
                    },
                    ReportStatus::Failed { error },
                )
            }
        };

        run.end(StageKind::Report, status, duration_ms);
        self.publish(run);
        delivery
    }

    fn publish(&self, run: &Run) {
        if let Some(status) = &self.status {
            status.send_replace(StatusSnapshot::of(run));
        }
    }
}

/// Collects the stage implementations before a run
#[derive(Default)]
pub struct OrchestratorBuilder {
    fetch: Option<Arc<dyn FetchStage>>,
    configure: Option<Arc<dyn ConfigureStage>>,
    diff: Option<Arc<dyn DiffStage>>,
    discover: Option<Arc<dyn DiscoverStage>>,
    filter: Option<Arc<dyn FilterStage>>,
    execute: Option<Arc<dyn ExecuteStage>>,
    collect: Option<Arc<dyn CollectStage>>,
    report: Option<Arc<dyn ReportStage>>,
    status: Option<watch::Sender<StatusSnapshot>>,
}

impl OrchestratorBuilder {
    pub fn fetch(mut self, stage: Arc<dyn FetchStage>) -> Self {
        self.fetch = Some(stage);
        self
    }

    pub fn configure(mut self, stage: Arc<dyn ConfigureStage>) -> Self {
        self.configure = Some(stage);
        self
    }

    pub fn diff(mut self, stage: Arc<dyn DiffStage>) -> Self {
        self.diff = Some(stage);
        self
    }

    pub fn discover(mut self, stage: Arc<dyn DiscoverStage>) -> Self {
        self.discover = Some(stage);
        self
    }

    pub fn filter(mut self, stage: Arc<dyn FilterStage>) -> Self {
        self.filter = Some(stage);
        self
    }

    pub fn execute(mut self, stage: Arc<dyn ExecuteStage>) -> Self {
        self.execute = Some(stage);
        self
    }

    pub fn collect(mut self, stage: Arc<dyn CollectStage>) -> Self {
        self.collect = Some(stage);
        self
    }

    pub fn report(mut self, stage: Arc<dyn ReportStage>) -> Self {
        self.report = Some(stage);
        self
    }

    /// Publish status snapshots on this channel
    pub fn status(mut self, sender: watch::Sender<StatusSnapshot>) -> Self {
        self.status = Some(sender);
        self
    }

    /// Fails naming the first missing stage, in execution order
    pub fn build(self) -> Result<Orchestrator, BuildError> {
        Ok(Orchestrator {
            fetch: self.fetch.ok_or(BuildError::MissingStage(StageKind::Fetch))?,
            configure: self
                .configure
                .ok_or(BuildError::MissingStage(StageKind::Configure))?,
            diff: self.diff.ok_or(BuildError::MissingStage(StageKind::Diff))?,
            discover: self
                .discover
                .ok_or(BuildError::MissingStage(StageKind::Discover))?,
            filter: self.filter.ok_or(BuildError::MissingStage(StageKind::Filter))?,
            execute: self
                .execute
                .ok_or(BuildError::MissingStage(StageKind::Execute))?,
            collect: self
                .collect
                .ok_or(BuildError::MissingStage(StageKind::Collect))?,
            report: self.report.ok_or(BuildError::MissingStage(StageKind::Report))?,
            status: self.status,
        })
    }
}
