//! Domain types for the nucleus coordinator.
//!
//! This module contains the core data structures:
//! - Run: run context, state machine and stage bookkeeping
//! - Outcome: the finalized, reported pipeline result
//! - Test cases: identifiers, impacted sets, execution results
//! - Payload, TAS config and blocklist inputs

pub mod blocklist;
pub mod outcome;
pub mod payload;
pub mod run;
pub mod tas;
pub mod test_case;

// Re-export commonly used types
pub use blocklist::{BlocklistEntry, RuleKind};
pub use outcome::{
    CoverageSummary, OutcomeStatus, PipelineOutcome, ReportStatus, StageRecord, StageStatus,
};
pub use payload::Payload;
pub use run::{Revisions, Run, RunContext, RunState, RunStateError, StageKind};
pub use tas::{ImpactMap, ImpactRule, TasConfig};
pub use test_case::{
    ExecutionResult, FilteredTests, ImpactedTestSet, Selection, TestId, TestStatus,
};
