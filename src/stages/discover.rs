//! Test discovery: resolve the selection against the tests that exist.
//!
//! The discovery command prints one test id per line. Its output is cached
//! under a fingerprint of everything that can change it, so repeated runs
//! of the same revision skip the command.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::core::{
    CacheKey, CacheStore, CommandSpec, DiscoverStage, ExecutionManager, ExitKind, StageError,
    StageResult, Staged,
};
use crate::domain::{ImpactedTestSet, Payload, RunContext, Selection, TasConfig, TestId};

use super::{cancellable, fatal, head_revision};

pub struct TestDiscovery {
    executor: Arc<ExecutionManager>,
    cache: Arc<CacheStore>,
}

impl TestDiscovery {
    pub fn new(executor: Arc<ExecutionManager>, cache: Arc<CacheStore>) -> Self {
        Self { executor, cache }
    }

    async fn cache_key(
        &self,
        ctx: &RunContext,
        payload: &Payload,
        tas: &TasConfig,
        command: &str,
    ) -> CacheKey {
        let lockfile = match &tas.lockfile {
            Some(name) => tokio::fs::read(ctx.config.repo_dir.join(name)).await.ok(),
            None => None,
        };

        CacheKey::builder()
            .field("stage", "discover")
            .field("project", &payload.project_id)
            .field("head", head_revision(ctx, payload))
            .optional("lockfile", lockfile)
            .field("command", command)
            .finish()
    }

    /// Every test the discovery command knows about, from cache when possible
    async fn known_tests(
        &self,
        ctx: &RunContext,
        payload: &Payload,
        tas: &TasConfig,
        command: &str,
    ) -> Result<ImpactedTestSet, StageError> {
        let key = self.cache_key(ctx, payload, tas, command).await;

        match cancellable(ctx, self.cache.get(&key)).await? {
            Ok(Some(entry)) => {
                let tests = parse_test_list(&String::from_utf8_lossy(&entry.payload));
                debug!(%key, tests = tests.len(), "Discovery served from cache");
                return Ok(tests);
            }
            Ok(None) => {}
            Err(e) => warn!(%key, error = %e, "Cache lookup failed, running discovery"),
        }

        let spec = CommandSpec::new("discover", command, &ctx.config.repo_dir)
            .with_env(tas.env.clone());
        let output = self.executor.run(&spec, &ctx.cancel).await.map_err(fatal)?;

        match output.exit {
            ExitKind::Exited(0) => {}
            ExitKind::Cancelled => return Err(StageError::Cancelled),
            ExitKind::TimedOut => return Err(fatal("discovery command timed out")),
            ExitKind::Exited(code) => {
                return Err(fatal(format!(
                    "discovery command exited with {}: {}",
                    code,
                    output.stderr.trim()
                )))
            }
        }

        if let Err(e) = cancellable(ctx, self.cache.put(&key, output.stdout.as_bytes())).await? {
            warn!(%key, error = %e, "Failed to cache discovery output");
        }

        Ok(parse_test_list(&output.stdout))
    }
}

#[async_trait]
impl DiscoverStage for TestDiscovery {
    async fn discover(
        &self,
        ctx: &RunContext,
        payload: &Payload,
        tas: &TasConfig,
        selection: Selection,
    ) -> StageResult<ImpactedTestSet> {
        let Some(command) = tas.discovery_command.as_deref() else {
            let tests = match selection {
                Selection::Impacted(impacted) => impacted,
                Selection::All => tas
                    .impact_map()
                    .map_err(|e| fatal(format!("{:#}", e)))?
                    .all_tests(),
            };
            return Ok(Staged::ok(tests));
        };

        if matches!(&selection, Selection::Impacted(impacted) if impacted.is_empty()) {
            debug!("Nothing impacted, skipping discovery");
            return Ok(Staged::ok(ImpactedTestSet::new()));
        }

        let known = self.known_tests(ctx, payload, tas, command).await?;

        let tests = match selection {
            Selection::Impacted(mut impacted) => {
                let before = impacted.len();
                impacted.retain(|id| known.contains(id));
                if impacted.len() < before {
                    info!(
                        dropped = before - impacted.len(),
                        "Impacted tests not found by discovery"
                    );
                }
                impacted
            }
            Selection::All => known,
        };

        Ok(Staged::ok(tests))
    }
}

fn parse_test_list(output: &str) -> ImpactedTestSet {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(TestId::from)
        .collect()
}
