//! Blocklist stage.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::adapters::BlocklistSource;
use crate::core::{blocklist, retry, FilterStage, RetryError, StageError, StageResult, Staged};
use crate::domain::{FilteredTests, ImpactedTestSet, Payload, RunContext};

pub const BLOCKLIST_UNAVAILABLE: &str = "blocklist unavailable";

pub struct BlocklistFilter {
    source: Arc<dyn BlocklistSource>,
}

impl BlocklistFilter {
    pub fn new(source: Arc<dyn BlocklistSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl FilterStage for BlocklistFilter {
    async fn filter(
        &self,
        ctx: &RunContext,
        payload: &Payload,
        impacted: ImpactedTestSet,
    ) -> StageResult<FilteredTests> {
        let project_id = payload.project_id.as_str();
        let fetched = retry(&ctx.config.retry, &ctx.cancel, "fetch blocklist", || {
            self.source.blocklist(project_id)
        })
        .await;

        let entries = match fetched {
            Ok(entries) => entries,
            Err(RetryError::Cancelled { .. }) => return Err(StageError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Blocklist fetch failed, running unfiltered");
                return Ok(Staged::degraded(
                    FilteredTests {
                        tests: impacted,
                        blocked: Vec::new(),
                    },
                    BLOCKLIST_UNAVAILABLE,
                ));
            }
        };

        let report = blocklist::filter(&impacted, &entries);
        info!(
            entries = entries.len(),
            kept = report.kept.len(),
            blocked = report.removed.len(),
            "Blocklist applied"
        );

        Ok(Staged::ok(FilteredTests {
            tests: report.kept,
            blocked: report.removed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLayer, NucleusConfig};
    use crate::domain::{BlocklistEntry, TestId};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct HungBlocklist;

    #[async_trait]
    impl BlocklistSource for HungBlocklist {
        async fn blocklist(&self, _: &str) -> anyhow::Result<Vec<BlocklistEntry>> {
            std::future::pending().await
        }
    }

    struct FixedBlocklist(Vec<BlocklistEntry>);

    #[async_trait]
    impl BlocklistSource for FixedBlocklist {
        async fn blocklist(&self, _: &str) -> anyhow::Result<Vec<BlocklistEntry>> {
            Ok(self.0.clone())
        }
    }

    fn context() -> RunContext {
        let config = NucleusConfig::resolve(ConfigLayer {
            payload_address: Some("payload.json".into()),
            blob_dir: Some("/tmp/blobs".into()),
            ..Default::default()
        })
        .unwrap();
        RunContext::new(Arc::new(config), CancellationToken::new())
    }

    fn payload() -> Payload {
        Payload::from_json(r#"{"build_id":"b","project_id":"p","head_commit":"h"}"#).unwrap()
    }

    #[tokio::test]
    async fn test_blocked_tests_are_reported() {
        let source = FixedBlocklist(vec![BlocklistEntry::exact("t2")]);
        let stage = BlocklistFilter::new(Arc::new(source));
        let impacted: ImpactedTestSet = ["t1", "t2"].into_iter().collect();

        let staged = stage.filter(&context(), &payload(), impacted).await.unwrap();

        assert_eq!(staged.value.tests.into_vec(), vec![TestId::from("t1")]);
        assert_eq!(staged.value.blocked, vec![TestId::from("t2")]);
        assert!(staged.degraded.is_none());
    }

    #[tokio::test]
    async fn test_cancel_stops_hung_blocklist_fetch() {
        let stage = BlocklistFilter::new(Arc::new(HungBlocklist));
        let ctx = context();
        let trigger = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            stage.filter(&ctx, &payload(), ["t1"].into_iter().collect()),
        )
        .await
        .expect("filter stage must stop once cancelled");

        assert_eq!(result.unwrap_err(), StageError::Cancelled);
    }
}
