//! Blob store implementations: filesystem, HTTP and in-memory.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::fs;

use super::BlobStore;

/// Blobs stored as files under a root directory
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path, refusing keys that escape the root
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            anyhow::bail!("Invalid blob key: '{}'", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("Failed to create blob directory: {}", parent.display()))?;

        // Write to a temp file in the same directory, then rename over the
        // target so readers never observe a partial blob.
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&parent)
                .context("Failed to create temporary blob file")?;
            tmp.write_all(&bytes).context("Failed to write blob")?;
            tmp.persist(&path)
                .with_context(|| format!("Failed to persist blob: {}", path.display()))?;
            Ok(())
        })
        .await
        .context("Blob writer task failed")?
    }

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read blob: {}", path.display())),
        }
    }
}

/// Blobs stored behind a plain HTTP GET/PUT endpoint
pub struct HttpBlobStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: super::http_client(),
        }
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .put(self.url(key))
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("Failed to upload blob '{}'", key))?;

        if !response.status().is_success() {
            anyhow::bail!("Blob upload '{}' failed with status {}", key, response.status());
        }
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get(self.url(key))
            .send()
            .await
            .with_context(|| format!("Failed to download blob '{}'", key))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .with_context(|| format!("Failed to read blob body '{}'", key))?;
                Ok(Some(bytes.to_vec()))
            }
            status => anyhow::bail!("Blob download '{}' failed with status {}", key, status),
        }
    }
}

/// Process-local blob store
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = blobs.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let mut blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(blobs.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_store_roundtrip_and_miss() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path());

        assert!(store.download("cache/abc.zst").await.unwrap().is_none());

        store.upload("cache/abc.zst", b"bytes".to_vec()).await.unwrap();
        assert_eq!(
            store.download("cache/abc.zst").await.unwrap(),
            Some(b"bytes".to_vec())
        );

        // Overwrite is atomic replacement
        store.upload("cache/abc.zst", b"newer".to_vec()).await.unwrap();
        assert_eq!(
            store.download("cache/abc.zst").await.unwrap(),
            Some(b"newer".to_vec())
        );
    }

    #[tokio::test]
    async fn test_fs_store_rejects_escaping_keys() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path());

        assert!(store.upload("../outside", vec![1]).await.is_err());
        assert!(store.download("/etc/passwd").await.is_err());
    }

    #[test]
    fn test_http_url_joining() {
        let store = HttpBlobStore::new("http://blobs.local/");
        assert_eq!(store.url("/coverage/a.zst"), "http://blobs.local/coverage/a.zst");
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryBlobStore::new();
        store.upload("b", vec![2]).await.unwrap();
        store.upload("a", vec![1]).await.unwrap();

        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.download("a").await.unwrap(), Some(vec![1]));
    }
}
