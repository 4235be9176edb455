//! Deterministic hostname matcher (the fast path).
//!
//! ## Matching Order
//!
//! For each active rule, a normalized hostname matches when:
//!
//! 1. it contains one of the rule's category tokens, or
//! 2. the [`PatternTable`] maps a category token onto a token in the host, or
//! 3. the rule description names the host literally or by platform name.
//!
//! A rule blocks only if it matches AND carries the `block` action. Results
//! of [`RuleMatcher::should_block`] are memoized per hostname until the next
//! [`RuleMatcher::load`]. Nothing here fails: unmatched input is `false`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::analysis::AnalysisResult;
use crate::cache::{HostCache, DEFAULT_CACHE_CAPACITY};
use crate::patterns::{description_matches, PatternTable};
use crate::rules::Rule;
use crate::store::RuleStore;

/// Category tokens shorter than this are not used for direct containment.
const MIN_DIRECT_TOKEN_LEN: usize = 3;

/// Normalizes a hostname for matching and caching.
///
/// Strips a URL scheme, path, port and a leading `www.`, then lower-cases.
///
/// ```
/// use vigil_core::matcher::clean_hostname;
///
/// assert_eq!(clean_hostname("www.Example.com:443"), "example.com");
/// assert_eq!(clean_hostname("https://example.com/a/b"), "example.com");
/// ```
pub fn clean_hostname(hostname: &str) -> String {
    let host = hostname.trim();
    let host = host
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(host);
    let host = host.split(['/', '?', '#']).next().unwrap_or(host);
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host);
    let host = host.trim_end_matches('.').to_lowercase();

    match host.strip_prefix("www.") {
        Some(stripped) => stripped.to_string(),
        None => host,
    }
}

/// Fast-path matcher over the shared [`RuleStore`].
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    store: RuleStore,
    patterns: Arc<PatternTable>,
    cache: Arc<Mutex<HostCache<bool>>>,
}

impl RuleMatcher {
    /// Creates a matcher with an empty store and the default pattern table.
    pub fn new() -> Self {
        Self::with_store(RuleStore::new())
    }

    /// Creates a matcher over an existing store.
    pub fn with_store(store: RuleStore) -> Self {
        Self::with_patterns(store, PatternTable::with_defaults())
    }

    /// Creates a matcher with a custom pattern table.
    pub fn with_patterns(store: RuleStore, patterns: PatternTable) -> Self {
        let generation = store.generation();
        let mut cache = HostCache::new(DEFAULT_CACHE_CAPACITY);
        cache.reset(generation);
        Self {
            store,
            patterns: Arc::new(patterns),
            cache: Arc::new(Mutex::new(cache)),
        }
    }

    /// Sets the cache capacity ceiling, dropping cached entries.
    pub fn with_cache_capacity(self, capacity: usize) -> Self {
        let mut cache = HostCache::new(capacity);
        cache.reset(self.store.generation());
        *self.cache.lock() = cache;
        self
    }

    /// Replaces the active rule set and clears the cache.
    pub fn load(&self, rules: Vec<Rule>) {
        let count = rules.len();
        let generation = self.store.replace(rules);
        self.cache.lock().reset(generation);
        tracing::debug!(rules = count, generation, "Rule matcher reloaded");
    }

    /// The underlying store.
    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    /// The pattern table in use.
    pub fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    /// Number of cached hostnames.
    pub fn cached_hosts(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns true if an active blocking rule matches the hostname.
    pub fn should_block(&self, hostname: &str) -> bool {
        let host = clean_hostname(hostname);
        if host.is_empty() {
            return false;
        }

        let snapshot = self.store.snapshot();
        if let Some(cached) = self.cache.lock().get(&host, snapshot.generation) {
            return cached;
        }

        let blocked = snapshot
            .active()
            .any(|rule| rule.blocks() && self.rule_matches(rule, &host));

        self.cache.lock().insert(host, blocked, snapshot.generation);
        blocked
    }

    /// All active rules matching the hostname, blocking or not.
    pub fn matching_rules(&self, hostname: &str) -> Vec<Rule> {
        let host = clean_hostname(hostname);
        if host.is_empty() {
            return Vec::new();
        }

        self.store
            .snapshot()
            .active()
            .filter(|rule| self.rule_matches(rule, &host))
            .cloned()
            .collect()
    }

    /// The first active blocking rule matching the hostname.
    pub fn blocking_rule(&self, hostname: &str) -> Option<Rule> {
        if !self.should_block(hostname) {
            return None;
        }
        self.matching_rules(hostname).into_iter().find(Rule::blocks)
    }

    /// Synthetic fast-path verdict for the hostname.
    pub fn analyze(&self, hostname: &str) -> AnalysisResult {
        AnalysisResult::from_matched_rules(&self.matching_rules(hostname))
    }

    fn rule_matches(&self, rule: &Rule, host: &str) -> bool {
        let direct = rule.categories.iter().any(|token| {
            let compact: String = token.chars().filter(|c| !c.is_whitespace()).collect();
            compact.len() >= MIN_DIRECT_TOKEN_LEN && host.contains(&compact)
        });
        if direct {
            return true;
        }

        if rule
            .categories
            .iter()
            .any(|token| self.patterns.category_matches(token, host))
        {
            return true;
        }

        description_matches(&rule.description_text, host)
    }
}

impl Default for RuleMatcher {
    fn default() -> Self {
        Self::new()
    }
}
