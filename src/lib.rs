//! nucleus - selective test-pipeline coordinator
//!
//! Runs once per ephemeral build container: works out which tests a change
//! impacts, drops blocklisted ones, runs the rest with secrets injected,
//! uploads coverage and reports the outcome to the control plane, while a
//! local API reports progress.
//!
//! # Architecture
//!
//! - A fixed sequence of eight stages, each injected as a trait object
//! - One cancellation token shared by the pipeline and the local API task
//! - Stage failures are classified (fatal, degraded, cancelled); every run
//!   ends in exactly one report
//!
//! # Modules
//!
//! - `adapters`: External systems (git, blob storage, control plane, secrets)
//! - `core`: Orchestrator, lifecycle, selector, blocklist, executor, cache
//! - `domain`: Data structures (RunContext, Run, PipelineOutcome, TasConfig)
//! - `stages`: Concrete stage implementations
//! - `server`: Local status API
//! - `cli`: Command-line interface and wiring
//!
//! # Usage
//!
//! ```bash
//! nucleus --payload-address /work/payload.json --repo-dir /work/repo
//!
//! # Against a control plane on the host
//! nucleus --local-runner --control-plane-host http://localhost:8080 \
//!     --payload-address http://localhost:8080/payload/42
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
pub mod server;
pub mod stages;

// Re-export main types at crate root for convenience
pub use config::NucleusConfig;
pub use core::{Lifecycle, Orchestrator, OrchestratorBuilder};
pub use domain::{OutcomeStatus, PipelineOutcome, RunContext, RunState, StageKind};
