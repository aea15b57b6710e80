//! Diff stage: changed paths to impacted tests, with the fallback policy.

use async_trait::async_trait;
use tracing::warn;

use crate::config::DiffFallback;
use crate::core::{DiffSelector, DiffStage, StageResult, Staged};
use crate::domain::{Payload, RunContext, Selection, TasConfig};

use super::{base_revision, cancellable, fatal, head_revision};

pub struct ImpactSelector {
    selector: DiffSelector,
}

impl ImpactSelector {
    pub fn new(selector: DiffSelector) -> Self {
        Self { selector }
    }
}

#[async_trait]
impl DiffStage for ImpactSelector {
    async fn select(
        &self,
        ctx: &RunContext,
        payload: &Payload,
        tas: &TasConfig,
    ) -> StageResult<Selection> {
        let map = tas.impact_map().map_err(|e| fatal(format!("{:#}", e)))?;
        let base = base_revision(ctx, payload);
        let head = head_revision(ctx, payload);

        let selected =
            cancellable(ctx, self.selector.select(&ctx.config.repo_dir, base, head, &map)).await?;

        match selected {
            Ok(impacted) => Ok(Staged::ok(Selection::Impacted(impacted))),
            Err(e) => match ctx.config.diff_fallback {
                DiffFallback::Fail => Err(fatal(e)),
                DiffFallback::RunAll => {
                    warn!(error = %e, "Diff unavailable, running all tests");
                    Ok(Staged::degraded(
                        Selection::All,
                        format!("{}; running all tests", e),
                    ))
                }
            },
        }
    }
}
