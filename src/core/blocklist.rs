//! Blocklist filtering of the impacted test set.
//!
//! Rules are first resolved against the impacted set into a concrete removal
//! set; the filter itself is plain set subtraction and never adds tests.

use std::collections::BTreeSet;

use glob::Pattern;
use tracing::warn;

use crate::domain::{BlocklistEntry, ImpactedTestSet, RuleKind, TestId};

/// Result of filtering: what runs and what was dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub kept: ImpactedTestSet,
    pub removed: Vec<TestId>,
}

/// Members of `impacted` matched by any entry.
///
/// Glob entries that fail to parse are logged and ignored.
pub fn resolve(impacted: &ImpactedTestSet, blocklist: &[BlocklistEntry]) -> BTreeSet<TestId> {
    let mut removals = BTreeSet::new();

    for entry in blocklist {
        match entry.kind {
            RuleKind::Exact => {
                if let Some(id) = entry.exact_id() {
                    if impacted.contains(&id) {
                        removals.insert(id);
                    }
                }
            }
            RuleKind::Prefix => {
                removals.extend(
                    impacted
                        .iter()
                        .filter(|id| id.as_str().starts_with(&entry.test))
                        .cloned(),
                );
            }
            RuleKind::Glob => match Pattern::new(&entry.test) {
                Ok(pattern) => {
                    removals.extend(
                        impacted
                            .iter()
                            .filter(|id| pattern.matches(id.as_str()))
                            .cloned(),
                    );
                }
                Err(e) => {
                    warn!(pattern = %entry.test, error = %e, "Ignoring invalid blocklist pattern");
                }
            },
        }
    }

    removals
}

pub fn filter(impacted: &ImpactedTestSet, blocklist: &[BlocklistEntry]) -> FilterReport {
    let removals = resolve(impacted, blocklist);
    FilterReport {
        kept: impacted.without(&removals),
        removed: removals.into_iter().collect(),
    }
}
