//! Final report to the control plane.
//!
//! The report is sent even for cancelled runs, so it retries under its own
//! token. The run's token only shortens the time budget: once shutdown has
//! started the report must fit inside the grace period.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::ControlPlane;
use crate::core::{retry, ReportStage, StageError, StageResult, Staged};
use crate::domain::{PipelineOutcome, RunContext};

/// Upper bound for delivering the report, retries included
pub const DEFAULT_REPORT_BUDGET: Duration = Duration::from_secs(60);

pub struct OutcomeReporter {
    control_plane: Arc<dyn ControlPlane>,
    budget: Duration,
}

impl OutcomeReporter {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            control_plane,
            budget: DEFAULT_REPORT_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    fn budget_for(&self, ctx: &RunContext) -> Duration {
        if ctx.is_cancelled() {
            self.budget.min(ctx.config.grace_period)
        } else {
            self.budget
        }
    }
}

#[async_trait]
impl ReportStage for OutcomeReporter {
    async fn report(&self, ctx: &RunContext, outcome: &PipelineOutcome) -> StageResult<()> {
        info!(status = ?outcome.status, tests_run = outcome.tests_run, "Reporting outcome");

        let budget = self.budget_for(ctx);
        let delivery = CancellationToken::new();
        let send = retry(&ctx.config.retry, &delivery, "report outcome", || {
            self.control_plane.report(outcome)
        });

        match tokio::time::timeout(budget, send).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(budget_ms = budget.as_millis() as u64, "Report delivery timed out");
                return Err(StageError::fatal(format!(
                    "report not delivered within {} ms",
                    budget.as_millis()
                )));
            }
        }

        Ok(Staged::ok(()))
    }
}
