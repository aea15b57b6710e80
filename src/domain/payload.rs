//! Task payload describing the change under test.

use serde::{Deserialize, Serialize};

/// Default name of the per-repository test configuration file
pub const DEFAULT_TAS_FILE: &str = ".tas.yml";

/// Build/test task handed to the container by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Build identifier assigned by the control plane
    pub build_id: String,

    /// Task identifier within the build
    #[serde(default)]
    pub task_id: String,

    /// Stable project identifier (used in cache keys and blocklist lookups)
    pub project_id: String,

    /// Repository slug, e.g. "org/repo"
    #[serde(default)]
    pub repo_slug: String,

    /// Baseline revision; absent for the first build of a branch
    #[serde(default)]
    pub base_commit: Option<String>,

    /// Revision under test
    pub head_commit: String,

    /// Name of the test configuration file relative to the repository root
    #[serde(default = "default_tas_file")]
    pub tas_file: String,
}

fn default_tas_file() -> String {
    DEFAULT_TAS_FILE.to_string()
}

impl Payload {
    /// Parse a payload from JSON
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}
