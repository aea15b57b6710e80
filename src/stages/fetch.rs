//! Payload retrieval and test-configuration parsing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::adapters::PayloadSource;
use crate::core::{retry, ConfigureStage, FetchStage, StageError, StageResult, Staged};
use crate::domain::{Payload, RunContext, TasConfig};

/// Fetches the task payload from the configured address, with retries
pub struct PayloadFetcher {
    source: Arc<dyn PayloadSource>,
}

impl PayloadFetcher {
    pub fn new(source: Arc<dyn PayloadSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl FetchStage for PayloadFetcher {
    async fn fetch(&self, ctx: &RunContext) -> StageResult<Payload> {
        let address = ctx.config.payload_address.as_str();

        let payload = retry(&ctx.config.retry, &ctx.cancel, "fetch payload", || {
            self.source.payload(address)
        })
        .await?;

        info!(
            build_id = %payload.build_id,
            project_id = %payload.project_id,
            head = %payload.head_commit,
            "Payload fetched"
        );
        Ok(Staged::ok(payload))
    }
}

/// Reads the payload's TAS file from the repository
#[derive(Debug, Default, Clone, Copy)]
pub struct TasLoader;

#[async_trait]
impl ConfigureStage for TasLoader {
    async fn configure(&self, ctx: &RunContext, payload: &Payload) -> StageResult<TasConfig> {
        let path = ctx.config.repo_dir.join(&payload.tas_file);

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            StageError::fatal(format!("Failed to read test config {}: {}", path.display(), e))
        })?;

        let tas = TasConfig::from_yaml(&content).map_err(|e| {
            StageError::fatal(format!("Invalid test config {}: {:#}", path.display(), e))
        })?;

        info!(
            framework = %tas.framework,
            impact_rules = tas.impact.len(),
            "Test config loaded"
        );
        Ok(Staged::ok(tas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLayer, NucleusConfig};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn context(temp: &TempDir) -> RunContext {
        let config = NucleusConfig::resolve(ConfigLayer {
            payload_address: Some("payload.json".into()),
            repo_dir: Some(temp.path().to_path_buf()),
            blob_dir: Some(temp.path().join("blobs")),
            ..Default::default()
        })
        .unwrap();
        RunContext::new(Arc::new(config), CancellationToken::new())
    }

    fn payload() -> Payload {
        Payload::from_json(r#"{"build_id":"b","project_id":"p","head_commit":"h"}"#).unwrap()
    }

    #[tokio::test]
    async fn test_missing_tas_file_is_fatal() {
        let temp = TempDir::new().unwrap();
        let result = TasLoader.configure(&context(&temp), &payload()).await;
        assert!(matches!(result, Err(StageError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_loads_tas_file_named_by_payload() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("ci.tas.yml"),
            "framework: pytest\ntest_command: \"pytest {test}\"\n",
        )
        .unwrap();

        let mut payload = payload();
        payload.tas_file = "ci.tas.yml".into();

        let staged = TasLoader.configure(&context(&temp), &payload).await.unwrap();
        assert_eq!(staged.value.framework, "pytest");
        assert!(staged.degraded.is_none());
    }
}
