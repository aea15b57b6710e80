//! Test identifiers, impacted-test sets and per-test execution results.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Opaque, case-sensitive name of a single test case within a project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Deduplicated, ordered set of tests warranted by a change.
///
/// Downstream stages only ever shrink the set once the selector has produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImpactedTestSet(BTreeSet<TestId>);

impl ImpactedTestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a test; returns false when it was already present
    pub fn insert(&mut self, id: TestId) -> bool {
        self.0.insert(id)
    }

    pub fn contains(&self, id: &TestId) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestId> {
        self.0.iter()
    }

    /// Keep only the tests for which `keep` returns true
    pub fn retain(&mut self, keep: impl FnMut(&TestId) -> bool) {
        self.0.retain(keep);
    }

    /// Remove every test contained in `removals`
    pub fn without(&self, removals: &BTreeSet<TestId>) -> Self {
        Self(self.0.difference(removals).cloned().collect())
    }

    /// Whether every member of `self` is also a member of `other`
    pub fn is_subset(&self, other: &ImpactedTestSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn into_vec(self) -> Vec<TestId> {
        self.0.into_iter().collect()
    }
}

impl FromIterator<TestId> for ImpactedTestSet {
    fn from_iter<I: IntoIterator<Item = TestId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for ImpactedTestSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(TestId::from).collect())
    }
}

impl IntoIterator for ImpactedTestSet {
    type Item = TestId;
    type IntoIter = std::collections::btree_set::IntoIter<TestId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Output of the diff stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Tests reachable from the changed paths
    Impacted(ImpactedTestSet),

    /// Every known test; only produced under the explicit run-all fallback policy
    All,
}

/// Output of the blocklist filter stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilteredTests {
    /// Tests that will be executed
    pub tests: ImpactedTestSet,

    /// Tests removed because they are blocklisted
    pub blocked: Vec<TestId>,
}

/// Outcome of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Errored,
}

/// Result of running one test command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub test_id: TestId,

    pub status: TestStatus,

    pub duration_ms: u64,

    /// Redacted stdout/stderr log written by the execution manager
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    /// Blob key of per-test coverage, when the framework produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn new(test_id: TestId, status: TestStatus, duration_ms: u64) -> Self {
        Self {
            test_id,
            status,
            duration_ms,
            output_path: None,
            coverage_ref: None,
            error: None,
        }
    }

    pub fn with_output(mut self, path: PathBuf) -> Self {
        self.output_path = Some(path);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
