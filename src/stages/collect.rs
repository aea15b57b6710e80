//! Coverage collection: compress and upload every file under the coverage
//! directory to `coverage/<project>/<head>/<path>.<codec>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::adapters::BlobStore;
use crate::core::{CollectStage, Compressor, StageError, StageResult, Staged};
use crate::domain::{CoverageSummary, ExecutionResult, Payload, RunContext, TasConfig};

use super::head_revision;

pub struct CoverageCollector {
    blobs: Arc<dyn BlobStore>,
    compressor: Arc<dyn Compressor>,
}

impl CoverageCollector {
    pub fn new(blobs: Arc<dyn BlobStore>, compressor: Arc<dyn Compressor>) -> Self {
        Self { blobs, compressor }
    }

    async fn upload_all(
        &self,
        ctx: &RunContext,
        prefix: &str,
        root: &Path,
    ) -> Result<CoverageSummary> {
        let metadata = tokio::fs::metadata(root)
            .await
            .with_context(|| format!("Coverage directory {} not found", root.display()))?;
        if !metadata.is_dir() {
            anyhow::bail!("Coverage path {} is not a directory", root.display());
        }

        let mut summary = CoverageSummary::default();
        for path in coverage_files(root)? {
            if ctx.is_cancelled() {
                anyhow::bail!("cancelled");
            }

            let relative = path
                .strip_prefix(root)
                .with_context(|| format!("{} is outside the coverage directory", path.display()))?;
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let compressed = self.compressor.compress(&data)?;

            let key = format!("{}/{}.{}", prefix, relative, self.compressor.name());
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => anyhow::bail!("cancelled"),
                uploaded = self.blobs.upload(&key, compressed) => {
                    uploaded.with_context(|| format!("Failed to upload {}", key))?
                }
            }

            debug!(%key, bytes = data.len(), "Coverage file uploaded");
            summary.total_bytes += data.len() as u64;
            summary.artifacts.push(key);
        }

        Ok(summary)
    }
}

/// Regular files under `root`, sorted
fn coverage_files(root: &Path) -> Result<Vec<PathBuf>> {
    let root_str = root
        .to_str()
        .with_context(|| format!("Coverage path {} is not valid UTF-8", root.display()))?;
    let pattern = format!("{}/**/*", glob::Pattern::escape(root_str.trim_end_matches('/')));

    let mut files = Vec::new();
    for entry in glob::glob(&pattern).context("Invalid coverage glob")? {
        let path = entry.context("Failed to walk coverage directory")?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[async_trait]
impl CollectStage for CoverageCollector {
    async fn collect(
        &self,
        ctx: &RunContext,
        payload: &Payload,
        tas: &TasConfig,
        results: &[ExecutionResult],
    ) -> StageResult<CoverageSummary> {
        let Some(dir) = tas.coverage_dir.as_deref() else {
            return Ok(Staged::ok(CoverageSummary::default()));
        };
        if results.is_empty() {
            debug!("No tests ran, skipping coverage");
            return Ok(Staged::ok(CoverageSummary::default()));
        }

        let root = ctx.config.repo_dir.join(dir);
        let prefix = format!("coverage/{}/{}", payload.project_id, head_revision(ctx, payload));

        match self.upload_all(ctx, &prefix, &root).await {
            Ok(summary) => {
                info!(
                    artifacts = summary.artifacts.len(),
                    total_bytes = summary.total_bytes,
                    "Coverage uploaded"
                );
                Ok(Staged::ok(summary))
            }
            Err(_) if ctx.is_cancelled() => Err(StageError::Cancelled),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Coverage collection failed");
                Ok(Staged::degraded(
                    CoverageSummary::default(),
                    format!("coverage collection failed: {:#}", e),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryBlobStore;
    use crate::config::{ConfigLayer, NucleusConfig};
    use crate::core::ZstdCompressor;
    use crate::domain::{TestId, TestStatus};
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

    fn inputs() -> (Payload, TasConfig, Vec<ExecutionResult>) {
        let payload = Payload::from_json(
            r#"{"build_id":"b","project_id":"proj","head_commit":"abc"}"#,
        )
        .unwrap();
        let tas =
            TasConfig::from_yaml("framework: jest\ntest_command: jest\ncoverage_dir: coverage\n")
                .unwrap();
        let results = vec![ExecutionResult::new(TestId::from("t1"), TestStatus::Passed, 1)];
        (payload, tas, results)
    }

    #[tokio::test]
    async fn test_uploads_compressed_files() {
        let temp = TempDir::new().unwrap();
        let coverage = temp.path().join("coverage").join("nested");
        std::fs::create_dir_all(&coverage).unwrap();
        std::fs::write(
            temp.path().join("coverage").join("lcov.info"),
            "TN:\nend_of_record\n",
        )
        .unwrap();
        std::fs::write(coverage.join("t1.json"), "{}").unwrap();

        let blobs = Arc::new(MemoryBlobStore::new());
        let collector = CoverageCollector::new(blobs.clone(), Arc::new(ZstdCompressor::default()));
        let (payload, tas, results) = inputs();

        let staged = collector
            .collect(&context(&temp), &payload, &tas, &results)
            .await
            .unwrap();

        assert!(staged.degraded.is_none());
        assert_eq!(
            staged.value.artifacts,
            vec![
                "coverage/proj/abc/lcov.info.zst".to_string(),
                "coverage/proj/abc/nested/t1.json.zst".to_string(),
            ]
        );
        assert_eq!(staged.value.total_bytes, 20);

        let stored = blobs
            .download("coverage/proj/abc/nested/t1.json.zst")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ZstdCompressor::default().decompress(&stored).unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_missing_directory_is_degraded() {
        let temp = TempDir::new().unwrap();
        let collector = CoverageCollector::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(ZstdCompressor::default()),
        );
        let (payload, tas, results) = inputs();

        let staged = collector
            .collect(&context(&temp), &payload, &tas, &results)
            .await
            .unwrap();

        assert!(staged.degraded.unwrap().contains("coverage collection failed"));
        assert!(staged.value.artifacts.is_empty());
    }

    struct HungBlobStore;

    #[async_trait]
    impl BlobStore for HungBlobStore {
        async fn upload(&self, _: &str, _: Vec<u8>) -> Result<()> {
            std::future::pending().await
        }

        async fn download(&self, _: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_hung_upload() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("coverage")).unwrap();
        std::fs::write(temp.path().join("coverage").join("lcov.info"), "TN:\n").unwrap();

        let collector =
            CoverageCollector::new(Arc::new(HungBlobStore), Arc::new(ZstdCompressor::default()));
        let (payload, tas, results) = inputs();
        let ctx = context(&temp);
        let trigger = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            collector.collect(&ctx, &payload, &tas, &results),
        )
        .await
        .expect("collect stage must stop once cancelled");

        assert_eq!(result.unwrap_err(), StageError::Cancelled);
    }
}
