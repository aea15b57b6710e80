//! Git source control via the `git` CLI.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::SourceControl;

/// Runs `git` subprocesses in the repository directory
pub struct GitCli {
    binary_path: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            binary_path: "git".to_string(),
        }
    }

    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    async fn git(&self, repo_dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary_path)
            .args(args)
            .current_dir(repo_dir)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn git {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "git {} failed with exit code {}: {}",
                args.join(" "),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        String::from_utf8(output.stdout).context("git output is not valid UTF-8")
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn changed_paths(&self, repo_dir: &Path, base: &str, head: &str) -> Result<Vec<String>> {
        // A shallow clone may be missing the baseline; fail with a clear message
        let base_ref = format!("{}^{{commit}}", base);
        self.git(repo_dir, &["cat-file", "-e", &base_ref])
            .await
            .with_context(|| format!("Baseline revision {} is not available", base))?;

        // -z keeps paths verbatim; without it non-ASCII names come back C-quoted
        let stdout = self
            .git(repo_dir, &["diff", "--name-only", "-z", "--no-renames", base, head])
            .await?;

        Ok(split_paths(&stdout))
    }
}

/// NUL-separated `git diff -z` output into paths
fn split_paths(output: &str) -> Vec<String> {
    output
        .split('\0')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_paths_keeps_names_verbatim() {
        let paths = split_paths("src/caf\u{e9}.js\0docs/read me.md\0");
        assert_eq!(paths, vec!["src/caf\u{e9}.js", "docs/read me.md"]);
    }

    #[test]
    fn test_custom_binary_path() {
        let git = GitCli::with_binary_path("/usr/local/bin/git");
        assert_eq!(git.binary_path, "/usr/local/bin/git");
    }

    #[tokio::test]
    async fn test_missing_repository_is_an_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let git = GitCli::new();

        let result = git.changed_paths(temp.path(), "HEAD~1", "HEAD").await;
        assert!(result.is_err());
    }
}
