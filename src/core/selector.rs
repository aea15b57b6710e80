//! Diff-driven test selection.
//!
//! Changed paths between the baseline and head revisions are mapped
//! through the project's impact rules and unioned into one deduplicated
//! set. An unavailable diff is an error; the selector never substitutes
//! "run everything" on its own.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::adapters::SourceControl;
use crate::domain::{ImpactMap, ImpactedTestSet};

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("no baseline revision to diff against")]
    MissingBaseline,

    #[error("diff {base}..{head} unavailable: {source:#}")]
    DiffUnavailable {
        base: String,
        head: String,
        #[source]
        source: anyhow::Error,
    },
}

pub struct DiffSelector {
    scm: Arc<dyn SourceControl>,
}

impl DiffSelector {
    pub fn new(scm: Arc<dyn SourceControl>) -> Self {
        Self { scm }
    }

    /// Paths changed between `base` and `head`
    pub async fn changed_paths(
        &self,
        repo_dir: &Path,
        base: Option<&str>,
        head: &str,
    ) -> Result<Vec<String>, SelectorError> {
        let base = base.ok_or(SelectorError::MissingBaseline)?;
        if base == head {
            debug!(base, "Baseline equals head, nothing changed");
            return Ok(Vec::new());
        }

        self.scm
            .changed_paths(repo_dir, base, head)
            .await
            .map_err(|source| SelectorError::DiffUnavailable {
                base: base.to_string(),
                head: head.to_string(),
                source,
            })
    }

    /// Union of the tests impacted by each path
    pub fn map_paths(paths: &[String], map: &ImpactMap) -> ImpactedTestSet {
        paths
            .iter()
            .flat_map(|path| map.tests_for(path).cloned().collect::<Vec<_>>())
            .collect()
    }

    pub async fn select(
        &self,
        repo_dir: &Path,
        base: Option<&str>,
        head: &str,
        map: &ImpactMap,
    ) -> Result<ImpactedTestSet, SelectorError> {
        let paths = self.changed_paths(repo_dir, base, head).await?;
        let impacted = Self::map_paths(&paths, map);

        info!(
            changed_paths = paths.len(),
            impacted_tests = impacted.len(),
            "Selected impacted tests"
        );
        Ok(impacted)
    }
}
