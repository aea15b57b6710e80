//! Configuration for the nucleus coordinator.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (with `NUCLEUS_*` environment fallbacks)
//! 2. Config file (`--config <path>`, YAML)
//! 3. Defaults
//!
//! The result is resolved once at startup into [`NucleusConfig`] and shared
//! read-only afterwards. The control-plane endpoint is part of that struct,
//! never process-wide state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::retry::RetryPolicy;

/// Control plane used when not running as a local runner
pub const REMOTE_CONTROL_PLANE_HOST: &str = "http://control-plane.tas.svc.cluster.local";

pub const DEFAULT_PORT: u16 = 9876;
pub const DEFAULT_PARALLELISM: usize = 4;
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5000;
pub const DEFAULT_CACHE_NAMESPACE: &str = "cache";
pub const LOG_FILE_NAME: &str = "nucleus.log";

/// Errors surfaced before any stage runs
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// What to do when the baseline diff cannot be computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffFallback {
    /// Surface a fatal error
    #[default]
    Fail,

    /// Run every known test, recorded as a degradation
    RunAll,
}

impl std::str::FromStr for DiffFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(Self::Fail),
            "run-all" => Ok(Self::RunAll),
            other => Err(format!("unknown diff fallback '{}' (expected fail|run-all)", other)),
        }
    }
}

/// One configuration layer; every field optional so layers can be merged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub log_file: Option<PathBuf>,
    pub verbose: Option<bool>,
    pub local_runner: Option<bool>,
    pub control_plane_host: Option<String>,
    pub payload_address: Option<String>,
    pub repo_dir: Option<PathBuf>,
    pub port: Option<u16>,
    pub secrets_file: Option<PathBuf>,
    pub blob_dir: Option<PathBuf>,
    pub blob_url: Option<String>,
    pub cache_namespace: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub parallelism: Option<usize>,
    pub grace_period_ms: Option<u64>,
    pub diff_fallback: Option<DiffFallback>,
    pub blocklist_file: Option<PathBuf>,
    pub base_commit: Option<String>,
    pub head_commit: Option<String>,
    pub retry: Option<RetryPolicy>,
}

impl ConfigLayer {
    /// Load a layer from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `other` on top of `self`; set fields in `other` win
    pub fn merge(self, other: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            log_file: other.log_file.or(self.log_file),
            verbose: other.verbose.or(self.verbose),
            local_runner: other.local_runner.or(self.local_runner),
            control_plane_host: other.control_plane_host.or(self.control_plane_host),
            payload_address: other.payload_address.or(self.payload_address),
            repo_dir: other.repo_dir.or(self.repo_dir),
            port: other.port.or(self.port),
            secrets_file: other.secrets_file.or(self.secrets_file),
            blob_dir: other.blob_dir.or(self.blob_dir),
            blob_url: other.blob_url.or(self.blob_url),
            cache_namespace: other.cache_namespace.or(self.cache_namespace),
            output_dir: other.output_dir.or(self.output_dir),
            parallelism: other.parallelism.or(self.parallelism),
            grace_period_ms: other.grace_period_ms.or(self.grace_period_ms),
            diff_fallback: other.diff_fallback.or(self.diff_fallback),
            blocklist_file: other.blocklist_file.or(self.blocklist_file),
            base_commit: other.base_commit.or(self.base_commit),
            head_commit: other.head_commit.or(self.head_commit),
            retry: other.retry.or(self.retry),
        }
    }
}

/// Where outcomes, blocklists and remote payloads are fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneEndpoint {
    pub host: String,
    pub local: bool,
}

impl ControlPlaneEndpoint {
    /// Pick the endpoint once: a local runner talks to its configured host
    pub fn resolve(local_runner: bool, host: Option<&str>) -> Result<Self, ConfigError> {
        if local_runner {
            let host = host
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .ok_or(ConfigError::Missing("control_plane_host (required for local runner)"))?;
            Ok(Self {
                host: host.trim_end_matches('/').to_string(),
                local: true,
            })
        } else {
            Ok(Self {
                host: REMOTE_CONTROL_PLANE_HOST.to_string(),
                local: false,
            })
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.host, path.trim_start_matches('/'))
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct NucleusConfig {
    /// Directory for the log file (`<dir>/nucleus.log`); stderr only when unset
    pub log_file: Option<PathBuf>,
    pub verbose: bool,
    pub control_plane: ControlPlaneEndpoint,
    pub payload_address: String,
    pub repo_dir: PathBuf,
    pub port: u16,
    pub secrets_file: Option<PathBuf>,
    pub blob_dir: PathBuf,
    pub blob_url: Option<String>,
    pub cache_namespace: String,
    pub output_dir: Option<PathBuf>,
    pub parallelism: usize,
    pub grace_period: Duration,
    pub diff_fallback: DiffFallback,
    pub blocklist_file: Option<PathBuf>,
    pub base_commit: Option<String>,
    pub head_commit: Option<String>,
    pub retry: RetryPolicy,
}

impl NucleusConfig {
    /// Resolve a merged layer into a validated configuration
    pub fn resolve(layer: ConfigLayer) -> Result<Self, ConfigError> {
        let local_runner = layer.local_runner.unwrap_or(false);
        let control_plane =
            ControlPlaneEndpoint::resolve(local_runner, layer.control_plane_host.as_deref())?;

        let payload_address = layer
            .payload_address
            .filter(|a| !a.trim().is_empty())
            .ok_or(ConfigError::Missing("payload_address"))?;

        let parallelism = layer.parallelism.unwrap_or(DEFAULT_PARALLELISM);
        if parallelism == 0 {
            return Err(ConfigError::Invalid {
                name: "parallelism",
                reason: "must be at least 1".to_string(),
            });
        }

        let blob_dir = match layer.blob_dir {
            Some(dir) => dir,
            None => default_blob_dir()?,
        };

        Ok(Self {
            log_file: layer.log_file,
            verbose: layer.verbose.unwrap_or(false),
            control_plane,
            payload_address,
            repo_dir: layer.repo_dir.unwrap_or_else(|| PathBuf::from(".")),
            port: layer.port.unwrap_or(DEFAULT_PORT),
            secrets_file: layer.secrets_file,
            blob_dir,
            blob_url: layer.blob_url,
            cache_namespace: layer
                .cache_namespace
                .unwrap_or_else(|| DEFAULT_CACHE_NAMESPACE.to_string()),
            output_dir: layer.output_dir,
            parallelism,
            grace_period: Duration::from_millis(
                layer.grace_period_ms.unwrap_or(DEFAULT_GRACE_PERIOD_MS),
            ),
            diff_fallback: layer.diff_fallback.unwrap_or_default(),
            blocklist_file: layer.blocklist_file,
            base_commit: layer.base_commit,
            head_commit: layer.head_commit,
            retry: layer.retry.unwrap_or_default(),
        })
    }

    /// Load the optional file layer and overlay the command-line layer
    pub fn load(file: Option<&Path>, overrides: ConfigLayer) -> Result<Self, ConfigError> {
        let base = match file {
            Some(path) => ConfigLayer::from_file(path)?,
            None => ConfigLayer::default(),
        };
        Self::resolve(base.merge(overrides))
    }

    /// Full path of the log file, if file logging is enabled
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file.as_ref().map(|dir| dir.join(LOG_FILE_NAME))
    }

    /// Whether the coordinator talks to a local control plane
    pub fn is_local_runner(&self) -> bool {
        self.control_plane.local
    }
}

/// Default cache backing directory (`~/.cache/nucleus/blobs` or platform equivalent)
fn default_blob_dir() -> Result<PathBuf, ConfigError> {
    dirs::cache_dir()
        .or_else(dirs::home_dir)
        .map(|dir| dir.join("nucleus").join("blobs"))
        .ok_or(ConfigError::Missing("blob_dir (no cache or home directory)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn layer_with_payload() -> ConfigLayer {
        ConfigLayer {
            payload_address: Some("payload.json".to_string()),
            blob_dir: Some(PathBuf::from("/tmp/blobs")),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = NucleusConfig::resolve(layer_with_payload()).unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.parallelism, DEFAULT_PARALLELISM);
        assert_eq!(config.grace_period, Duration::from_millis(5000));
        assert_eq!(config.diff_fallback, DiffFallback::Fail);
        assert!(!config.is_local_runner());
        assert_eq!(config.control_plane.host, REMOTE_CONTROL_PLANE_HOST);
    }

    #[test]
    fn test_local_runner_uses_trimmed_host() {
        let layer = ConfigLayer {
            local_runner: Some(true),
            control_plane_host: Some("  http://localhost:8080/ ".to_string()),
            ..layer_with_payload()
        };
        let config = NucleusConfig::resolve(layer).unwrap();

        assert!(config.is_local_runner());
        assert_eq!(config.control_plane.url("/report"), "http://localhost:8080/report");
    }

    #[test]
    fn test_local_runner_requires_host() {
        let layer = ConfigLayer {
            local_runner: Some(true),
            ..layer_with_payload()
        };
        assert!(matches!(
            NucleusConfig::resolve(layer),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn test_missing_payload_and_zero_parallelism() {
        assert!(matches!(
            NucleusConfig::resolve(ConfigLayer::default()),
            Err(ConfigError::Missing("payload_address"))
        ));

        let layer = ConfigLayer {
            parallelism: Some(0),
            ..layer_with_payload()
        };
        assert!(matches!(
            NucleusConfig::resolve(layer),
            Err(ConfigError::Invalid { name: "parallelism", .. })
        ));
    }

    #[test]
    fn test_cli_layer_overrides_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nucleus.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
payload_address: from-file.json
port: 7000
parallelism: 8
diff_fallback: run-all
retry:
  max_attempts: 5
"#
        )
        .unwrap();

        let overrides = ConfigLayer {
            port: Some(7100),
            blob_dir: Some(temp.path().join("blobs")),
            ..Default::default()
        };
        let config = NucleusConfig::load(Some(&path), overrides).unwrap();

        assert_eq!(config.payload_address, "from-file.json");
        assert_eq!(config.port, 7100);
        assert_eq!(config.parallelism, 8);
        assert_eq!(config.diff_fallback, DiffFallback::RunAll);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_log_path() {
        let layer = ConfigLayer {
            log_file: Some(PathBuf::from("/var/log/tas")),
            ..layer_with_payload()
        };
        let config = NucleusConfig::resolve(layer).unwrap();
        assert_eq!(config.log_path(), Some(PathBuf::from("/var/log/tas/nucleus.log")));
    }
}
