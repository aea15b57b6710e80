//! Command-line interface and process wiring.
//!
//! Parses flags into a configuration layer, builds every collaborator once
//! and hands them to the orchestrator, then runs the pipeline and the local
//! API under the lifecycle coordinator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{
    BlobStore, BlocklistSource, FileBlocklist, FilePayloadSource, FileSecretProvider, FsBlobStore,
    GitCli, HttpBlobStore, HttpControlPlane, PayloadSource, SecretProvider, StaticSecrets,
};
use crate::config::{ConfigError, ConfigLayer, DiffFallback, NucleusConfig};
use crate::core::{
    shutdown_signal, CacheStore, Compressor, DiffSelector, ExecutionManager, Lifecycle,
    Orchestrator, StatusSnapshot, ZstdCompressor,
};
use crate::domain::RunContext;
use crate::server;
use crate::stages::{
    BlocklistFilter, CoverageCollector, ImpactSelector, OutcomeReporter, PayloadFetcher,
    TasLoader, TestDiscovery, TestRunner,
};

/// nucleus - selective test-pipeline coordinator
#[derive(Parser, Debug, Default)]
#[command(name = "nucleus")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file; flags override its values
    #[arg(long, env = "NUCLEUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for nucleus.log (stderr only when unset)
    #[arg(long, env = "NUCLEUS_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, env = "NUCLEUS_VERBOSE")]
    pub verbose: bool,

    /// Talk to a control plane at --control-plane-host instead of the cluster one
    #[arg(long, env = "NUCLEUS_LOCAL_RUNNER")]
    pub local_runner: bool,

    #[arg(long, env = "NUCLEUS_CONTROL_PLANE_HOST")]
    pub control_plane_host: Option<String>,

    /// Payload file path or http(s) URL
    #[arg(long, env = "NUCLEUS_PAYLOAD_ADDRESS")]
    pub payload_address: Option<String>,

    /// Repository checkout
    #[arg(long, env = "NUCLEUS_REPO_DIR")]
    pub repo_dir: Option<PathBuf>,

    /// Local API port
    #[arg(short, long, env = "NUCLEUS_PORT")]
    pub port: Option<u16>,

    /// JSON object of secret name to value
    #[arg(long, env = "NUCLEUS_SECRETS_FILE")]
    pub secrets_file: Option<PathBuf>,

    #[arg(long, env = "NUCLEUS_BLOB_DIR")]
    pub blob_dir: Option<PathBuf>,

    /// Use an HTTP blob store instead of --blob-dir
    #[arg(long, env = "NUCLEUS_BLOB_URL")]
    pub blob_url: Option<String>,

    #[arg(long, env = "NUCLEUS_CACHE_NAMESPACE")]
    pub cache_namespace: Option<String>,

    /// Where command logs are written (a temporary directory when unset)
    #[arg(long, env = "NUCLEUS_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrently running test commands
    #[arg(long, env = "NUCLEUS_PARALLELISM")]
    pub parallelism: Option<usize>,

    #[arg(long, env = "NUCLEUS_GRACE_PERIOD_MS")]
    pub grace_period_ms: Option<u64>,

    /// fail | run-all
    #[arg(long, env = "NUCLEUS_DIFF_FALLBACK")]
    pub diff_fallback: Option<DiffFallback>,

    /// Local blocklist file instead of the control plane
    #[arg(long, env = "NUCLEUS_BLOCKLIST_FILE")]
    pub blocklist_file: Option<PathBuf>,

    /// Override the payload's baseline revision
    #[arg(long, env = "NUCLEUS_BASE_COMMIT")]
    pub base_commit: Option<String>,

    /// Override the payload's head revision
    #[arg(long, env = "NUCLEUS_HEAD_COMMIT")]
    pub head_commit: Option<String>,
}

impl Cli {
    /// Flags as a configuration layer; unset flags leave lower layers alone
    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            log_file: self.log_file.clone(),
            verbose: self.verbose.then_some(true),
            local_runner: self.local_runner.then_some(true),
            control_plane_host: self.control_plane_host.clone(),
            payload_address: self.payload_address.clone(),
            repo_dir: self.repo_dir.clone(),
            port: self.port,
            secrets_file: self.secrets_file.clone(),
            blob_dir: self.blob_dir.clone(),
            blob_url: self.blob_url.clone(),
            cache_namespace: self.cache_namespace.clone(),
            output_dir: self.output_dir.clone(),
            parallelism: self.parallelism,
            grace_period_ms: self.grace_period_ms,
            diff_fallback: self.diff_fallback,
            blocklist_file: self.blocklist_file.clone(),
            base_commit: self.base_commit.clone(),
            head_commit: self.head_commit.clone(),
            retry: None,
        }
    }

    pub fn resolve(&self) -> Result<NucleusConfig, ConfigError> {
        NucleusConfig::load(self.config.as_deref(), self.layer())
    }
}

fn is_http(address: &str) -> bool {
    address.starts_with("http://") || address.starts_with("https://")
}

/// Build all collaborators, run to completion and return the exit code
pub async fn run(config: Arc<NucleusConfig>) -> Result<i32> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting nucleus");
    if config.is_local_runner() {
        info!(host = %config.control_plane.host, "Using local control plane");
    } else {
        info!(host = %config.control_plane.host, "Using remote control plane");
    }

    let control_plane = Arc::new(HttpControlPlane::new(config.control_plane.clone()));

    let blobs: Arc<dyn BlobStore> = match &config.blob_url {
        Some(url) => Arc::new(HttpBlobStore::new(url.clone())),
        None => Arc::new(FsBlobStore::new(config.blob_dir.clone())),
    };
    let compressor: Arc<dyn Compressor> = Arc::new(ZstdCompressor::default());
    let cache = Arc::new(CacheStore::new(
        blobs.clone(),
        compressor.clone(),
        config.cache_namespace.clone(),
    ));

    let payloads: Arc<dyn PayloadSource> = if is_http(&config.payload_address) {
        control_plane.clone()
    } else {
        Arc::new(FilePayloadSource)
    };

    let blocklist: Arc<dyn BlocklistSource> = match &config.blocklist_file {
        Some(path) => Arc::new(FileBlocklist::new(path.clone())),
        None => control_plane.clone(),
    };

    let secrets: Arc<dyn SecretProvider> = match &config.secrets_file {
        Some(path) => Arc::new(FileSecretProvider::new(path.clone())),
        None => Arc::new(StaticSecrets::default()),
    };

    // Held until the run ends; removed on drop
    let scratch = tempfile::Builder::new()
        .prefix("nucleus-")
        .tempdir()
        .context("Failed to create output directory")?;
    let output_dir = config
        .output_dir
        .clone()
        .unwrap_or_else(|| scratch.path().to_path_buf());
    let executor = Arc::new(ExecutionManager::new(secrets, output_dir, config.parallelism));

    let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());

    let orchestrator = Orchestrator::builder()
        .fetch(Arc::new(PayloadFetcher::new(payloads)))
        .configure(Arc::new(TasLoader))
        .diff(Arc::new(ImpactSelector::new(DiffSelector::new(Arc::new(GitCli::new())))))
        .discover(Arc::new(TestDiscovery::new(executor.clone(), cache)))
        .filter(Arc::new(BlocklistFilter::new(blocklist)))
        .execute(Arc::new(TestRunner::new(executor)))
        .collect(Arc::new(CoverageCollector::new(blobs, compressor)))
        .report(Arc::new(OutcomeReporter::new(control_plane)))
        .status(status_tx)
        .build()?;

    let listener = server::bind(config.port).await?;

    let cancel = CancellationToken::new();
    let ctx = RunContext::new(config.clone(), cancel.clone());
    info!(run_id = %ctx.run_id, "Run context created");

    let lifecycle = Lifecycle::new(cancel.clone()).with_grace_period(config.grace_period);
    let report = lifecycle
        .run(
            async move { orchestrator.start(&ctx).await },
            server::serve(listener, status_rx, cancel),
            shutdown_signal(),
        )
        .await;

    let code = report.exit_code();
    match &report.pipeline {
        Some(outcome) => info!(
            shutdown = ?report.shutdown,
            status = ?outcome.status,
            report = ?outcome.report,
            exit_code = code,
            "Coordinator finished"
        ),
        None => warn!(
            shutdown = ?report.shutdown,
            exit_code = code,
            "Coordinator finished without an outcome"
        ),
    }

    drop(scratch);
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file_layer() {
        let cli = Cli::parse_from([
            "nucleus",
            "--payload-address",
            "payload.json",
            "--parallelism",
            "2",
            "--diff-fallback",
            "run-all",
            "--local-runner",
            "--control-plane-host",
            "http://127.0.0.1:9000",
            "--blob-dir",
            "/tmp/blobs",
        ]);

        let config = cli.resolve().unwrap();
        assert_eq!(config.parallelism, 2);
        assert_eq!(config.diff_fallback, DiffFallback::RunAll);
        assert!(config.is_local_runner());
    }

    #[test]
    fn test_unset_bool_flags_do_not_override() {
        let layer = Cli::default().layer();
        assert_eq!(layer.verbose, None);
        assert_eq!(layer.local_runner, None);
    }

    #[test]
    fn test_payload_address_kind() {
        assert!(is_http("https://cp/payload/1"));
        assert!(!is_http("/work/payload.json"));
    }
}
