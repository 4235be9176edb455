//! Per-hostname semantic categories, memoized for the process lifetime.
//!
//! Categories come from [`InferenceClient::categorize_host`] and are cached
//! per normalized hostname until [`DomainCategorizer::clear_cache`]. Failed
//! lookups are not cached. A failure never blocks.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::{HostCache, DEFAULT_CACHE_CAPACITY};
use crate::error::Result;
use crate::inference::InferenceClient;
use crate::matcher::clean_hostname;
use crate::rules::Rule;

/// Returns true if two category labels overlap.
///
/// Broad labels match their refinements in either direction, so `social`
/// overlaps `social media`.
pub fn categories_overlap(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.starts_with(&b) || b.starts_with(&a) || a.contains(&b) || b.contains(&a)
}

fn rule_overlaps(rule: &Rule, categories: &[String]) -> bool {
    rule.categories
        .iter()
        .any(|rc| categories.iter().any(|c| categories_overlap(rc, c)))
}

/// Active rules whose categories overlap `categories`.
pub fn rules_for_categories<'a>(categories: &[String], rules: &'a [Rule]) -> Vec<&'a Rule> {
    rules
        .iter()
        .filter(|r| r.is_active && rule_overlaps(r, categories))
        .collect()
}

/// First active blocking rule whose categories overlap `categories`.
pub fn blocking_rule_for<'a>(categories: &[String], rules: &'a [Rule]) -> Option<&'a Rule> {
    rules
        .iter()
        .filter(|r| r.is_active && r.blocks())
        .find(|r| rule_overlaps(r, categories))
}

/// Caching wrapper around host categorization.
#[derive(Debug, Clone)]
pub struct DomainCategorizer {
    client: InferenceClient,
    cache: Arc<Mutex<HostCache<Vec<String>>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Exclusive right to run the background lookup for one host.
///
/// Released when dropped, whether or not the lookup finished.
#[derive(Debug)]
pub struct LookupClaim {
    categorizer: DomainCategorizer,
    host: String,
}

impl LookupClaim {
    /// The normalized hostname being looked up.
    pub fn hostname(&self) -> &str {
        &self.host
    }

    /// Runs the lookup, filling the cache on success.
    pub async fn run(self) -> Result<Vec<String>> {
        self.categorizer.categorize(&self.host).await
    }
}

impl Drop for LookupClaim {
    fn drop(&mut self) {
        self.categorizer.in_flight.lock().remove(&self.host);
    }
}

impl DomainCategorizer {
    /// Creates a categorizer with the default cache ceiling.
    pub fn new(client: InferenceClient) -> Self {
        Self::with_cache_capacity(client, DEFAULT_CACHE_CAPACITY)
    }

    /// Creates a categorizer with a custom cache ceiling.
    pub fn with_cache_capacity(client: InferenceClient, capacity: usize) -> Self {
        Self {
            client,
            cache: Arc::new(Mutex::new(HostCache::new(capacity))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The underlying inference client.
    pub fn client(&self) -> &InferenceClient {
        &self.client
    }

    /// Categories for `hostname`, asking the model on a cache miss.
    pub async fn categorize(&self, hostname: &str) -> Result<Vec<String>> {
        let host = clean_hostname(hostname);
        if host.is_empty() {
            return Ok(Vec::new());
        }

        let generation = {
            let cache = self.cache.lock();
            if let Some(hit) = cache.get(&host, cache.generation()) {
                return Ok(hit);
            }
            cache.generation()
        };

        let categories = self.client.categorize_host(&host).await?;
        debug!(hostname = %host, categories = ?categories, "Host categorized");

        // A clear during the request bumps the generation and drops this result.
        self.cache
            .lock()
            .insert(host, categories.clone(), generation);
        Ok(categories)
    }

    /// Claims the background lookup for `hostname`.
    ///
    /// `None` if the host is already cached or another lookup for it is
    /// still running, so concurrent flows to one host trigger a single query.
    pub fn claim_lookup(&self, hostname: &str) -> Option<LookupClaim> {
        let host = clean_hostname(hostname);
        if host.is_empty() || self.cached_categories(&host).is_some() {
            return None;
        }
        if !self.in_flight.lock().insert(host.clone()) {
            return None;
        }
        Some(LookupClaim {
            categorizer: self.clone(),
            host,
        })
    }

    /// Cached categories for `hostname`, without any network call.
    pub fn cached_categories(&self, hostname: &str) -> Option<Vec<String>> {
        let host = clean_hostname(hostname);
        let cache = self.cache.lock();
        cache.get(&host, cache.generation())
    }

    /// Records categories learned elsewhere, such as from a content verdict.
    ///
    /// Merges with anything already cached for the host.
    pub fn remember(&self, hostname: &str, categories: &[String]) {
        let host = clean_hostname(hostname);
        if host.is_empty() || categories.is_empty() {
            return;
        }

        let mut cache = self.cache.lock();
        let generation = cache.generation();
        let mut merged = cache.get(&host, generation).unwrap_or_default();
        for category in categories {
            let category = category.trim().to_lowercase();
            if !category.is_empty() && !merged.contains(&category) {
                merged.push(category);
            }
        }
        cache.insert(host, merged, generation);
    }

    /// Returns true if the host's categories overlap an active blocking rule.
    ///
    /// Classification failure yields `false`.
    pub async fn should_block(&self, hostname: &str, rules: &[Rule]) -> bool {
        if !rules.iter().any(|r| r.is_active && r.blocks()) {
            return false;
        }

        match self.categorize(hostname).await {
            Ok(categories) => blocking_rule_for(&categories, rules).is_some(),
            Err(e) => {
                warn!(hostname, error = %e, "Categorization failed, not blocking");
                false
            }
        }
    }


    /// Number of cached hostnames.
    pub fn cached_hosts(&self) -> usize {
        self.cache.lock().len()
    }

    /// Forgets every cached host.
    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock();
        let next = cache.generation() + 1;
        cache.reset(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::test_support::{unreachable_config, FakeEndpoint, Reply};
    use crate::rules::{RuleAction, Severity};

    fn social_rule() -> Rule {
        Rule::new("No social media", ["social"], [RuleAction::Block], Severity::Medium)
    }

    async fn categorizer_with(replies: Vec<Reply>) -> (DomainCategorizer, FakeEndpoint) {
        let fake = FakeEndpoint::start(replies).await;
        let client = InferenceClient::new(fake.config()).unwrap();
        (DomainCategorizer::new(client), fake)
    }

    // ==================== Overlap Tests ====================

    #[test]
    fn broad_category_overlaps_refinement() {
        assert!(categories_overlap("social", "social media"));
        assert!(categories_overlap("Social Media", "social"));
        assert!(categories_overlap("gaming", "gaming"));
        assert!(!categories_overlap("news", "gaming"));
        assert!(!categories_overlap("", "gaming"));
    }

    #[test]
    fn blocking_rule_requires_active_block() {
        let categories = vec!["social media".to_string()];
        let alert_only = Rule::new("watch", ["social"], [RuleAction::Alert], Severity::Low);
        let inactive = social_rule().with_active(false);
        assert!(blocking_rule_for(&categories, &[alert_only, inactive]).is_none());
        assert!(blocking_rule_for(&categories, &[social_rule()]).is_some());
    }

    #[test]
    fn rules_for_categories_includes_non_blocking() {
        let categories = vec!["gaming".to_string()];
        let alert = Rule::new("watch", ["gaming"], [RuleAction::Alert], Severity::Low);
        let rules = [alert, social_rule()];
        let found = rules_for_categories(&categories, &rules);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].description_text, "watch");
    }

    // ==================== Categorize Tests ====================

    #[tokio::test]
    async fn categorize_is_memoized() {
        let (categorizer, fake) =
            categorizer_with(vec![Reply::text(r#"{"categories": ["social media"]}"#)]).await;

        let first = categorizer.categorize("www.instagram.com").await.unwrap();
        let second = categorizer.categorize("instagram.com:443").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fake.hits(), 1);
        assert_eq!(categorizer.cached_hosts(), 1);
    }

    #[tokio::test]
    async fn should_block_on_overlap() {
        let (categorizer, _fake) =
            categorizer_with(vec![Reply::text(r#"{"categories": ["social media"]}"#)]).await;
        assert!(categorizer.should_block("instagram.com", &[social_rule()]).await);
    }

    #[tokio::test]
    async fn no_blocking_rules_skips_lookup() {
        let (categorizer, fake) = categorizer_with(vec![]).await;
        let rule = Rule::new("log it", ["social"], [RuleAction::Log], Severity::Low);
        assert!(!categorizer.should_block("instagram.com", &[rule]).await);
        assert_eq!(fake.hits(), 0);
    }

    #[tokio::test]
    async fn failure_does_not_block_and_is_not_cached() {
        let client = InferenceClient::new(unreachable_config().await).unwrap();
        let categorizer = DomainCategorizer::new(client);

        assert!(!categorizer.should_block("instagram.com", &[social_rule()]).await);
        assert_eq!(categorizer.cached_hosts(), 0);
        assert!(categorizer.cached_categories("instagram.com").is_none());
    }

    #[tokio::test]
    async fn clear_cache_forces_new_lookup() {
        let (categorizer, fake) = categorizer_with(vec![
            Reply::text(r#"{"categories": ["news"]}"#),
            Reply::text(r#"{"categories": ["social media"]}"#),
        ])
        .await;

        assert_eq!(categorizer.categorize("example.com").await.unwrap(), vec!["news"]);
        categorizer.clear_cache();
        assert_eq!(
            categorizer.categorize("example.com").await.unwrap(),
            vec!["social media"]
        );
        assert_eq!(fake.hits(), 2);
    }

    // ==================== Lookup Claim Tests ====================

    #[tokio::test]
    async fn concurrent_flows_share_one_lookup() {
        let (categorizer, fake) =
            categorizer_with(vec![Reply::text(r#"{"categories": ["social media"]}"#)]).await;

        let claim = categorizer.claim_lookup("www.instagram.com").unwrap();
        assert_eq!(claim.hostname(), "instagram.com");
        assert!(categorizer.claim_lookup("instagram.com:443").is_none());
        assert!(categorizer.claim_lookup("instagram.com").is_none());

        claim.run().await.unwrap();
        assert_eq!(fake.hits(), 1);
        assert!(categorizer.claim_lookup("instagram.com").is_none());
    }

    #[tokio::test]
    async fn failed_lookup_releases_claim() {
        let client = InferenceClient::new(unreachable_config().await).unwrap();
        let categorizer = DomainCategorizer::new(client);

        let claim = categorizer.claim_lookup("instagram.com").unwrap();
        assert!(claim.run().await.is_err());
        assert!(categorizer.claim_lookup("instagram.com").is_some());
    }

    // ==================== Cache-only Tests ====================

    #[tokio::test]
    async fn remembered_categories_drive_cached_blocking() {
        let (categorizer, fake) = categorizer_with(vec![]).await;
        let rules = [social_rule()];
        assert!(categorizer.cached_categories("chat.example").is_none());

        categorizer.remember("chat.example", &["Social Media".to_string()]);

        let cached = categorizer.cached_categories("www.chat.example").unwrap();
        let rule = blocking_rule_for(&cached, &rules).unwrap();
        assert_eq!(rule.description_text, "No social media");
        assert_eq!(fake.hits(), 0);
    }
}
