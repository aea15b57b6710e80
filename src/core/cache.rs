//! Content-addressable cache of compressed artifacts.
//!
//! Keys are fingerprints of everything that determines an artifact, so two
//! writers of the same key produce interchangeable payloads and no locking
//! is needed. Entries are only appended or read; retention is external.
//!
//! Layout in the backing blob store:
//! - `<namespace>/<key>.<codec>`: compressed payload
//! - `<namespace>/<key>.json`: metadata, written after the payload

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::adapters::BlobStore;

use super::compressor::{CompressError, Compressor};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0:#}")]
    Backend(#[source] anyhow::Error),

    #[error(transparent)]
    Codec(#[from] CompressError),

    #[error("corrupt cache metadata for {key}: {source}")]
    Metadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Deterministic fingerprint of an artifact's generating inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn builder() -> Fingerprint {
        Fingerprint::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental SHA-256 over named, length-prefixed inputs.
///
/// Length prefixes keep `("ab", "c")` and `("a", "bc")` distinct.
#[derive(Default)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn field(mut self, name: &str, value: impl AsRef<[u8]>) -> Self {
        let value = value.as_ref();
        self.hasher.update((name.len() as u64).to_le_bytes());
        self.hasher.update(name.as_bytes());
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
        self
    }

    /// Add a field only when present; absence is itself part of the hash
    pub fn optional(self, name: &str, value: Option<impl AsRef<[u8]>>) -> Self {
        match value {
            Some(v) => self.field(name, v),
            None => self.field(&format!("{}:absent", name), b""),
        }
    }

    pub fn finish(self) -> CacheKey {
        CacheKey(hex::encode(self.hasher.finalize()))
    }
}

/// Metadata stored next to each payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub size_bytes: u64,
    pub compressed_bytes: u64,
    pub created_at: DateTime<Utc>,

    /// Hex SHA-256 of the uncompressed payload
    pub digest: String,
}

/// A decompressed cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Vec<u8>,
    pub metadata: EntryMetadata,
}

/// Cache over a blob store and a compressor; cheap to share behind `Arc`
pub struct CacheStore {
    blobs: Arc<dyn BlobStore>,
    compressor: Arc<dyn Compressor>,
    namespace: String,
}

impl CacheStore {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        compressor: Arc<dyn Compressor>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            blobs,
            compressor,
            namespace: namespace.into().trim_matches('/').to_string(),
        }
    }

    fn payload_key(&self, key: &CacheKey) -> String {
        format!("{}/{}.{}", self.namespace, key, self.compressor.name())
    }

    fn metadata_key(&self, key: &CacheKey) -> String {
        format!("{}/{}.json", self.namespace, key)
    }

    /// Look up an entry; a miss is `Ok(None)`
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let Some(raw_meta) = self
            .blobs
            .download(&self.metadata_key(key))
            .await
            .map_err(CacheError::Backend)?
        else {
            debug!(%key, "Cache miss");
            return Ok(None);
        };

        let metadata: EntryMetadata =
            serde_json::from_slice(&raw_meta).map_err(|source| CacheError::Metadata {
                key: key.to_string(),
                source,
            })?;

        let Some(compressed) = self
            .blobs
            .download(&self.payload_key(key))
            .await
            .map_err(CacheError::Backend)?
        else {
            warn!(%key, "Cache metadata without payload, treating as miss");
            return Ok(None);
        };

        let payload = self.compressor.decompress(&compressed)?;
        if digest(&payload) != metadata.digest {
            warn!(%key, "Cache payload digest mismatch, treating as miss");
            return Ok(None);
        }

        debug!(%key, size_bytes = metadata.size_bytes, "Cache hit");
        Ok(Some(CacheEntry {
            key: key.clone(),
            payload,
            metadata,
        }))
    }

    /// Compress and store a payload
    pub async fn put(&self, key: &CacheKey, payload: &[u8]) -> Result<CacheEntry, CacheError> {
        let compressed = self.compressor.compress(payload)?;
        let metadata = EntryMetadata {
            size_bytes: payload.len() as u64,
            compressed_bytes: compressed.len() as u64,
            created_at: Utc::now(),
            digest: digest(payload),
        };

        self.blobs
            .upload(&self.payload_key(key), compressed)
            .await
            .map_err(CacheError::Backend)?;

        let raw_meta = serde_json::to_vec(&metadata).map_err(|source| CacheError::Metadata {
            key: key.to_string(),
            source,
        })?;
        self.blobs
            .upload(&self.metadata_key(key), raw_meta)
            .await
            .map_err(CacheError::Backend)?;

        debug!(
            %key,
            size_bytes = metadata.size_bytes,
            compressed_bytes = metadata.compressed_bytes,
            "Cache entry stored"
        );
        Ok(CacheEntry {
            key: key.clone(),
            payload: payload.to_vec(),
            metadata,
        })
    }
}

fn digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}
