//! In-memory rule store.
//!
//! Holds the active rule set behind a lock and hands out immutable
//! snapshots. A reload swaps the whole set and bumps the generation, so a
//! reader sees either the old complete set or the new complete set.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::rules::Rule;

/// Immutable view of the rule set at one generation.
#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    /// The rules, active and inactive.
    pub rules: Arc<Vec<Rule>>,
    /// Generation counter, bumped on every replace.
    pub generation: u64,
}

impl RuleSnapshot {
    /// Iterates over the active rules.
    pub fn active(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.is_active)
    }

    /// Returns true if any active rule blocks.
    pub fn has_blocking_rules(&self) -> bool {
        self.active().any(Rule::blocks)
    }
}

/// Shared handle to the active rule set.
#[derive(Debug, Clone)]
pub struct RuleStore {
    inner: Arc<RwLock<RuleSnapshot>>,
}

impl RuleStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_rules(Vec::new())
    }

    /// Creates a store holding `rules` at generation 0.
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RuleSnapshot {
                rules: Arc::new(rules),
                generation: 0,
            })),
        }
    }

    /// Replaces the rule set. Returns the new generation.
    pub fn replace(&self, rules: Vec<Rule>) -> u64 {
        let mut guard = self.inner.write();
        guard.rules = Arc::new(rules);
        guard.generation += 1;
        guard.generation
    }

    /// Takes a consistent snapshot.
    pub fn snapshot(&self) -> RuleSnapshot {
        self.inner.read().clone()
    }

    /// Copies out the current rules.
    pub fn rules(&self) -> Vec<Rule> {
        self.inner.read().rules.as_ref().clone()
    }

    /// Copies out the current active rules.
    pub fn active_rules(&self) -> Vec<Rule> {
        self.snapshot().active().cloned().collect()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Number of rules, active or not.
    pub fn len(&self) -> usize {
        self.inner.read().rules.len()
    }

    /// Returns true if the store holds no rules.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleAction, Severity};

    fn rule(active: bool) -> Rule {
        Rule::new("test", ["gaming"], [RuleAction::Block], Severity::Low).with_active(active)
    }

    #[test]
    fn replace_bumps_generation() {
        let store = RuleStore::new();
        assert_eq!(store.generation(), 0);
        assert_eq!(store.replace(vec![rule(true)]), 1);
        assert_eq!(store.replace(vec![]), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_replace() {
        let store = RuleStore::with_rules(vec![rule(true)]);
        let snapshot = store.snapshot();
        store.replace(vec![]);
        assert_eq!(snapshot.rules.len(), 1);
        assert_eq!(snapshot.generation, 0);
    }

    #[test]
    fn active_rules_filters_inactive() {
        let store = RuleStore::with_rules(vec![rule(true), rule(false)]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.active_rules().len(), 1);
        assert!(store.snapshot().has_blocking_rules());
    }
}
