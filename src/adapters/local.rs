//! File-backed sources used by local runs: payload, blocklist and secrets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;

use crate::domain::{BlocklistEntry, Payload};

use super::{BlocklistSource, PayloadSource, SecretProvider};

/// Payload read from a JSON file; the address is the file path
#[derive(Debug, Default, Clone, Copy)]
pub struct FilePayloadSource;

#[async_trait]
impl PayloadSource for FilePayloadSource {
    async fn payload(&self, address: &str) -> Result<Payload> {
        let content = fs::read_to_string(address)
            .await
            .with_context(|| format!("Failed to read payload file: {}", address))?;

        Payload::from_json(&content)
            .with_context(|| format!("Failed to parse payload: {}", address))
    }
}

/// Blocklist read from a YAML (or JSON) list of entries
pub struct FileBlocklist {
    path: PathBuf,
}

impl FileBlocklist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BlocklistSource for FileBlocklist {
    async fn blocklist(&self, _project_id: &str) -> Result<Vec<BlocklistEntry>> {
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read blocklist: {}", self.path.display()))?;

        // YAML is a superset of JSON, one parser covers both
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse blocklist: {}", self.path.display()))
    }
}

/// Secrets from a JSON object of name → value; a missing file means no secrets
pub struct FileSecretProvider {
    path: PathBuf,
}

impl FileSecretProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SecretProvider for FileSecretProvider {
    async fn secrets(&self) -> Result<HashMap<String, String>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read secrets: {}", self.path.display()))
            }
        };

        // Never include the content in the error
        serde_json::from_str(&content).map_err(|_| {
            anyhow::anyhow!(
                "Secrets file {} is not a JSON object of strings",
                self.path.display()
            )
        })
    }
}

/// Fixed in-process secrets
#[derive(Debug, Default, Clone)]
pub struct StaticSecrets(HashMap<String, String>);

impl StaticSecrets {
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self(secrets)
    }
}

#[async_trait]
impl SecretProvider for StaticSecrets {
    async fn secrets(&self) -> Result<HashMap<String, String>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_payload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("payload.json");
        std::fs::write(
            &path,
            r#"{"build_id":"b","project_id":"p","base_commit":"aaa","head_commit":"bbb"}"#,
        )
        .unwrap();

        let payload = FilePayloadSource
            .payload(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(payload.base_commit.as_deref(), Some("aaa"));
    }

    #[tokio::test]
    async fn test_file_blocklist_accepts_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blocklist.json");
        std::fs::write(&path, r#"[{"test":"t2","reason":"flaky"}]"#).unwrap();

        let entries = FileBlocklist::new(&path).blocklist("p").await.unwrap();
        assert_eq!(entries, vec![BlocklistEntry::exact("t2").with_reason("flaky")]);
    }

    #[tokio::test]
    async fn test_missing_secrets_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let provider = FileSecretProvider::new(temp.path().join("absent.json"));
        assert!(provider.secrets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_secrets_do_not_leak() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("secrets.json");
        std::fs::write(&path, "TOKEN=hunter2").unwrap();

        let err = FileSecretProvider::new(&path).secrets().await.unwrap_err();
        assert!(!format!("{:#}", err).contains("hunter2"));
    }
}
