//! Core orchestration logic.
//!
//! This module contains:
//! - Orchestrator: the fixed stage sequence and its error policy
//! - Lifecycle: pipeline and local API tasks, interrupts and grace period
//! - Stage: stage capabilities and error classification
//! - Selector and blocklist filter
//! - Execution manager, secrets and redaction
//! - Cache store and compressor
//! - Retry policy for stage-local operations

pub mod blocklist;
pub mod cache;
pub mod compressor;
pub mod executor;
pub mod lifecycle;
pub mod orchestrator;
pub mod retry;
pub mod secrets;
pub mod selector;
pub mod stage;

// Re-export commonly used types
pub use blocklist::{filter, FilterReport};
pub use cache::{CacheEntry, CacheError, CacheKey, CacheStore, EntryMetadata, Fingerprint};
pub use compressor::{CompressError, Compressor, ZstdCompressor};
pub use executor::{CommandOutput, CommandSpec, ExecError, ExecutionManager, ExitKind};
pub use lifecycle::{shutdown_signal, Lifecycle, LifecycleReport, Shutdown, DEFAULT_GRACE_PERIOD};
pub use orchestrator::{BuildError, Orchestrator, OrchestratorBuilder, StatusSnapshot};
pub use retry::{retry, RetryError, RetryPolicy};
pub use secrets::{resolve_placeholders, Redactor, SecretError};
pub use selector::{DiffSelector, SelectorError};
pub use stage::{
    CollectStage, ConfigureStage, DiffStage, DiscoverStage, ExecuteStage, FetchStage,
    FilterStage, ReportStage, StageError, StageResult, Staged,
};
