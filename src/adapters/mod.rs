//! Adapter interfaces for external systems.
//!
//! Adapters give the stages a fixed contract over source control, blob
//! storage, the remote control plane and secret sources. Concrete
//! implementations live in the submodules.

pub mod blob;
pub mod control_plane;
pub mod git;
pub mod local;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{BlocklistEntry, Payload, PipelineOutcome};

/// Per-request timeout of the HTTP adapters
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub use blob::{FsBlobStore, HttpBlobStore, MemoryBlobStore};
pub use control_plane::HttpControlPlane;
pub use git::GitCli;
pub use local::{FileBlocklist, FilePayloadSource, FileSecretProvider, StaticSecrets};

/// Remote object storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// `Ok(None)` when the key does not exist
    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Source-control queries
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Repository-relative paths changed between two revisions
    async fn changed_paths(&self, repo_dir: &Path, base: &str, head: &str) -> Result<Vec<String>>;
}

/// Receiver of the final run outcome
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn report(&self, outcome: &PipelineOutcome) -> Result<()>;
}

/// Listing of blocklisted tests for a project
#[async_trait]
pub trait BlocklistSource: Send + Sync {
    async fn blocklist(&self, project_id: &str) -> Result<Vec<BlocklistEntry>>;
}

/// Where the task payload comes from
#[async_trait]
pub trait PayloadSource: Send + Sync {
    async fn payload(&self, address: &str) -> Result<Payload>;
}

/// Secret name → value pairs injected into test commands
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn secrets(&self) -> Result<HashMap<String, String>>;
}

/// HTTP client shared by the control-plane and blob adapters
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to build HTTP client, using defaults");
            reqwest::Client::new()
        })
}
