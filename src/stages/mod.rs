//! Concrete stage implementations wired into the orchestrator by the binary.
//!
//! Each stage owns the collaborators it needs and classifies its own
//! failures into [`StageError`](crate::core::StageError) or a degraded value.

pub mod collect;
pub mod discover;
pub mod execute;
pub mod fetch;
pub mod filter;
pub mod report;
pub mod select;

pub use collect::CoverageCollector;
pub use discover::TestDiscovery;
pub use execute::TestRunner;
pub use fetch::{PayloadFetcher, TasLoader};
pub use filter::BlocklistFilter;
pub use report::OutcomeReporter;
pub use select::ImpactSelector;

use std::future::Future;

use crate::core::StageError;
use crate::domain::{Payload, RunContext};

/// Revision under test: the context override, else the payload's
pub(crate) fn head_revision<'a>(ctx: &'a RunContext, payload: &'a Payload) -> &'a str {
    ctx.revisions.head.as_deref().unwrap_or(&payload.head_commit)
}

/// Baseline revision: the context override, else the payload's
pub(crate) fn base_revision<'a>(ctx: &'a RunContext, payload: &'a Payload) -> Option<&'a str> {
    ctx.revisions
        .base
        .as_deref()
        .or(payload.base_commit.as_deref())
}

pub(crate) fn fatal(err: impl std::fmt::Display) -> StageError {
    StageError::fatal(err.to_string())
}

/// Await `fut` unless the run is cancelled first; the future is dropped then
pub(crate) async fn cancellable<F: Future>(
    ctx: &RunContext,
    fut: F,
) -> Result<F::Output, StageError> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(StageError::Cancelled),
        output = fut => Ok(output),
    }
}
