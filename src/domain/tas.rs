//! Per-repository test configuration (`.tas.yml`).
//!
//! Describes how to run a single test, how to list every test, where
//! coverage lands, and which source paths impact which tests.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use super::test_case::{ImpactedTestSet, TestId};

/// Placeholder substituted with the test identifier in `test_command`
pub const TEST_PLACEHOLDER: &str = "{test}";

/// Parsed test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasConfig {
    /// Test framework name (informational, e.g. "jest", "pytest")
    pub framework: String,

    /// Command template run once per test, `{test}` is replaced by the test id
    pub test_command: String,

    /// Command printing one test id per line
    #[serde(default)]
    pub discovery_command: Option<String>,

    /// Directory (relative to the repository) where coverage files are written
    #[serde(default)]
    pub coverage_dir: Option<String>,

    /// Dependency lockfile whose contents participate in cache keys
    #[serde(default)]
    pub lockfile: Option<String>,

    /// Extra environment for test commands; values may reference `${{ secrets.NAME }}`
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Path rules mapping changed files to the tests they impact
    #[serde(default)]
    pub impact: Vec<ImpactRule>,
}

/// One path → tests rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactRule {
    /// Glob patterns over repository-relative paths
    pub paths: Vec<String>,

    /// Tests exercised by files matching `paths`
    pub tests: Vec<TestId>,
}

impl TasConfig {
    /// Load from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read test config: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse from YAML content and validate
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(content).context("Failed to parse test config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.test_command.trim().is_empty() {
            anyhow::bail!("test_command cannot be empty");
        }

        for (i, rule) in self.impact.iter().enumerate() {
            if rule.paths.is_empty() {
                anyhow::bail!("Impact rule {} has no paths", i);
            }
            for pattern in &rule.paths {
                Pattern::new(pattern)
                    .with_context(|| format!("Impact rule {} has invalid glob '{}'", i, pattern))?;
            }
        }

        Ok(())
    }

    /// Compile the impact rules into a matcher
    pub fn impact_map(&self) -> Result<ImpactMap> {
        ImpactMap::compile(&self.impact)
    }

    /// Render the shell command for a single test; the id is one quoted word
    pub fn command_for(&self, test: &TestId) -> String {
        let word = shell_quote(test.as_str());
        if self.test_command.contains(TEST_PLACEHOLDER) {
            self.test_command.replace(TEST_PLACEHOLDER, &word)
        } else {
            format!("{} {}", self.test_command, word)
        }
    }
}

/// Compiled impact rules
#[derive(Debug, Clone, Default)]
pub struct ImpactMap {
    rules: Vec<(Vec<Pattern>, Vec<TestId>)>,
}

impl ImpactMap {
    pub fn compile(rules: &[ImpactRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let patterns = rule
                .paths
                .iter()
                .map(|p| Pattern::new(p).with_context(|| format!("Invalid glob '{}'", p)))
                .collect::<Result<Vec<_>>>()?;
            compiled.push((patterns, rule.tests.clone()));
        }
        Ok(Self { rules: compiled })
    }

    /// Tests impacted by a single changed path
    pub fn tests_for(&self, path: &str) -> impl Iterator<Item = &TestId> + '_ {
        let path = path.trim_start_matches("./").to_string();
        self.rules
            .iter()
            .filter(move |(patterns, _)| {
                patterns
                    .iter()
                    .any(|p| p.matches_with(&path, path_match_options()))
            })
            .flat_map(|(_, tests)| tests.iter())
    }

    /// Every test named by any rule
    pub fn all_tests(&self) -> ImpactedTestSet {
        self.rules
            .iter()
            .flat_map(|(_, tests)| tests.iter().cloned())
            .collect()
    }
}

/// POSIX single-quoting; ids made only of safe characters stay bare
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:=+,@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// `*` stays within a path segment, `**` crosses segments
pub(crate) fn path_match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}
