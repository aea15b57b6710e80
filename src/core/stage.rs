//! Stage capabilities and their error classification.
//!
//! Each stage is a trait so the orchestrator can be wired with any
//! implementation. A stage consumes upstream output, produces downstream
//! output, and fails only with a classification: the orchestrator never
//! sees the underlying cause.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    CoverageSummary, ExecutionResult, FilteredTests, ImpactedTestSet, Payload, PipelineOutcome,
    RunContext, Selection, TasConfig,
};

/// Classified stage failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The run cannot proceed
    #[error("{0}")]
    Fatal(String),

    /// The stage observed the cancellation signal and stopped
    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }
}

impl From<super::retry::RetryError> for StageError {
    fn from(err: super::retry::RetryError) -> Self {
        match err {
            super::retry::RetryError::Cancelled { .. } => Self::Cancelled,
            exhausted => Self::Fatal(exhausted.to_string()),
        }
    }
}

/// Successful stage output, possibly degraded
#[derive(Debug, Clone, PartialEq)]
pub struct Staged<T> {
    pub value: T,

    /// Why the value is partial; `None` when the stage fully succeeded
    pub degraded: Option<String>,
}

impl<T> Staged<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            degraded: None,
        }
    }

    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Self {
            value,
            degraded: Some(reason.into()),
        }
    }
}

pub type StageResult<T> = Result<Staged<T>, StageError>;

/// Retrieve the task payload
#[async_trait]
pub trait FetchStage: Send + Sync {
    async fn fetch(&self, ctx: &RunContext) -> StageResult<Payload>;
}

/// Parse the repository's test configuration
#[async_trait]
pub trait ConfigureStage: Send + Sync {
    async fn configure(&self, ctx: &RunContext, payload: &Payload) -> StageResult<TasConfig>;
}

/// Select impacted tests from the change
#[async_trait]
pub trait DiffStage: Send + Sync {
    async fn select(
        &self,
        ctx: &RunContext,
        payload: &Payload,
        tas: &TasConfig,
    ) -> StageResult<Selection>;
}

/// Resolve the selection against the tests that actually exist
#[async_trait]
pub trait DiscoverStage: Send + Sync {
    async fn discover(
        &self,
        ctx: &RunContext,
        payload: &Payload,
        tas: &TasConfig,
        selection: Selection,
    ) -> StageResult<ImpactedTestSet>;
}

/// Remove blocklisted tests
#[async_trait]
pub trait FilterStage: Send + Sync {
    async fn filter(
        &self,
        ctx: &RunContext,
        payload: &Payload,
        impacted: ImpactedTestSet,
    ) -> StageResult<FilteredTests>;
}

/// Run the selected tests
#[async_trait]
pub trait ExecuteStage: Send + Sync {
    async fn execute(
        &self,
        ctx: &RunContext,
        payload: &Payload,
        tas: &TasConfig,
        tests: ImpactedTestSet,
    ) -> StageResult<Vec<ExecutionResult>>;
}

/// Collect and upload coverage
#[async_trait]
pub trait CollectStage: Send + Sync {
    async fn collect(
        &self,
        ctx: &RunContext,
        payload: &Payload,
        tas: &TasConfig,
        results: &[ExecutionResult],
    ) -> StageResult<CoverageSummary>;
}

/// Send the final outcome to the control plane
#[async_trait]
pub trait ReportStage: Send + Sync {
    async fn report(&self, ctx: &RunContext, outcome: &PipelineOutcome) -> StageResult<()>;
}
