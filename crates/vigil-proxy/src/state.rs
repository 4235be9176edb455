//! Shared state for connection handlers and the internal API.

use std::sync::Arc;

use tracing::warn;
use vigil_core::{
    DomainCategorizer, FilterEvent, FlowEvaluator, InferenceClient, Rule, RuleMatcher,
};
use vigil_storage::SharedStorage;

use crate::config::ProxyConfig;
use crate::error::Result;

/// Everything a connection needs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProxyState {
    /// Server configuration.
    pub config: Arc<ProxyConfig>,
    /// Fast-path matcher over the shared rule store.
    pub matcher: RuleMatcher,
    /// Matcher plus cached categories.
    pub evaluator: FlowEvaluator,
    /// Inference client, absent in rules-only mode.
    pub inference: Option<InferenceClient>,
    /// Host categorizer, absent in rules-only mode.
    pub categorizer: Option<DomainCategorizer>,
    /// Shared-storage handle for events and rules.
    pub storage: SharedStorage,
    /// Client used to fetch from origins.
    pub http: reqwest::Client,
}

impl ProxyState {
    /// Creates state over `storage`. Without `inference` the server runs
    /// rules-only.
    pub fn new(
        config: ProxyConfig,
        storage: SharedStorage,
        inference: Option<InferenceClient>,
    ) -> Result<Self> {
        let matcher = RuleMatcher::new();
        let categorizer = inference.clone().map(DomainCategorizer::new);
        let evaluator = FlowEvaluator::new(matcher.clone(), categorizer.clone());

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            matcher,
            evaluator,
            inference,
            categorizer,
            storage,
            http,
        })
    }

    /// Currently active rules.
    pub fn active_rules(&self) -> Vec<Rule> {
        self.matcher.store().active_rules()
    }

    /// Appends an event on the blocking pool. Storage failures are logged,
    /// never raised, so a flow is never failed by its own bookkeeping.
    pub async fn record(&self, event: FilterEvent) {
        let storage = self.storage.clone();
        let hostname = event.hostname.clone();
        match tokio::task::spawn_blocking(move || storage.append_event(&event)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(hostname = %hostname, error = %e, "Failed to record event"),
            Err(e) => warn!(hostname = %hostname, error = %e, "Event writer task failed"),
        }
    }
}


#[cfg(test)]
mod tests {
    use vigil_core::EventAction;

    use super::test_support::create_test_state;
    use super::*;

    // ==================== Record Tests ====================

    #[tokio::test(flavor = "current_thread")]
    async fn record_appends_from_single_threaded_runtime() {
        let (state, _dir) = create_test_state(vec![]);
        state
            .record(FilterEvent::new(EventAction::Blocked, "a.com", "proxy", "r"))
            .await;
        state
            .record(FilterEvent::new(EventAction::Allowed, "b.com", "proxy", "r"))
            .await;

        let events = state.storage.load_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].hostname, "b.com");
    }

    #[tokio::test]
    async fn record_swallows_storage_failure() {
        let (state, dir) = create_test_state(vec![]);
        drop(dir);
        state
            .record(FilterEvent::new(EventAction::Blocked, "a.com", "proxy", "r"))
            .await;
    }
}
