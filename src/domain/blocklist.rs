//! Blocklist entries: tests excluded regardless of impact.

use serde::{Deserialize, Serialize};

use super::test_case::TestId;

/// How an entry's `test` field is matched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Exact, case-sensitive identifier
    #[default]
    Exact,

    /// Every test whose identifier starts with `test`
    Prefix,

    /// Glob pattern over identifiers
    Glob,
}

/// A blocklisted test (or rule) with its reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocklistEntry {
    pub test: String,

    #[serde(default)]
    pub kind: RuleKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BlocklistEntry {
    pub fn exact(test: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            kind: RuleKind::Exact,
            reason: None,
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            test: prefix.into(),
            kind: RuleKind::Prefix,
            reason: None,
        }
    }

    pub fn glob(pattern: impl Into<String>) -> Self {
        Self {
            test: pattern.into(),
            kind: RuleKind::Glob,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// The identifier this entry names when it is an exact rule
    pub fn exact_id(&self) -> Option<TestId> {
        match self.kind {
            RuleKind::Exact => Some(TestId::new(self.test.clone())),
            _ => None,
        }
    }
}
