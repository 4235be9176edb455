//! Rule reloading driven by the shared change timestamp.
//!
//! ```text
//! controller → saveRules → rules.timestamp
//!                               ↓ (poll)
//!                        RuleWatcher → RuleMatcher.load + categorizer cache clear
//! ```
//!
//! A rules file that fails to parse is treated as "no update": the previous
//! set stays active and the next tick tries again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use vigil_core::{DomainCategorizer, RuleMatcher};
use vigil_storage::SharedStorage;

use crate::config::DEFAULT_POLL_INTERVAL;
use crate::state::ProxyState;

/// Sentinel for "no timestamp seen yet".
const NEVER: u64 = 0;

/// Polls shared storage and reloads rules when they change.
#[derive(Clone)]
pub struct RuleWatcher {
    storage: SharedStorage,
    matcher: RuleMatcher,
    categorizer: Option<DomainCategorizer>,
    /// Change timestamp of the rules currently loaded.
    last_seen: Arc<AtomicU64>,
    poll_interval: Duration,
}

impl std::fmt::Debug for RuleWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleWatcher")
            .field("dir", &self.storage.dir())
            .field("last_seen", &self.last_seen.load(Ordering::Relaxed))
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl RuleWatcher {
    /// Creates a watcher feeding `matcher` and clearing `categorizer`.
    pub fn new(
        storage: SharedStorage,
        matcher: RuleMatcher,
        categorizer: Option<DomainCategorizer>,
    ) -> Self {
        Self {
            storage,
            matcher,
            categorizer,
            last_seen: Arc::new(AtomicU64::new(NEVER)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Creates a watcher for the server's state, at its poll interval.
    pub fn for_state(state: &ProxyState) -> Self {
        Self::new(
            state.storage.clone(),
            state.matcher.clone(),
            state.categorizer.clone(),
        )
        .with_poll_interval(state.config.poll_interval)
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Change timestamp of the loaded rules, if any were loaded.
    pub fn last_seen(&self) -> Option<u64> {
        Some(self.last_seen.load(Ordering::Relaxed)).filter(|ts| *ts != NEVER)
    }

    /// Loads whatever rules exist now. Returns true if a set was loaded.
    pub fn load_initial(&self) -> bool {
        match self.storage.change_timestamp() {
            Ok(Some(ts)) => self.refresh(ts),
            Ok(None) => {
                debug!("No shared rules yet");
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to read rule timestamp");
                false
            }
        }
    }

    /// Reloads if the change timestamp moved. Returns true if rules were
    /// reloaded.
    pub fn poll(&self) -> bool {
        match self.storage.change_timestamp() {
            Ok(Some(ts)) if ts != self.last_seen.load(Ordering::Relaxed) => self.refresh(ts),
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "Failed to poll for rule changes");
                false
            }
        }
    }

    /// Loads the rules file and records `ts` as seen. On failure nothing
    /// changes, so the next poll retries.
    pub fn refresh(&self, ts: u64) -> bool {
        let rules = match self.storage.load_rules() {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "Failed to load shared rules, keeping previous set");
                return false;
            }
        };

        let count = rules.len();
        self.matcher.load(rules);
        if let Some(categorizer) = &self.categorizer {
            categorizer.clear_cache();
        }
        self.last_seen.store(ts, Ordering::Relaxed);

        info!(rules = count, timestamp = ts, "Rules reloaded");
        true
    }

    /// Background polling task. Spawn the returned future.
    pub fn start_polling(self: Arc<Self>) -> impl std::future::Future<Output = ()> + Send {
        let watcher = self;
        async move {
            loop {
                tokio::time::sleep(watcher.poll_interval).await;
                watcher.poll();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vigil_core::{Rule, RuleAction, Severity};

    fn gaming_rule() -> Rule {
        Rule::new("No gaming", ["gaming"], [RuleAction::Block], Severity::Medium)
    }

    fn create_watcher() -> (RuleWatcher, SharedStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = SharedStorage::open(dir.path()).unwrap();
        let watcher = RuleWatcher::new(storage.clone(), RuleMatcher::new(), None)
            .with_poll_interval(Duration::from_millis(1));
        (watcher, storage, dir)
    }

    #[test]
    fn test_first_run_loads_nothing() {
        let (watcher, _storage, _dir) = create_watcher();
        assert!(!watcher.load_initial());
        assert!(!watcher.poll());
        assert!(watcher.last_seen().is_none());
        assert!(watcher.matcher.store().is_empty());
    }

    #[test]
    fn test_poll_picks_up_saved_rules() {
        let (watcher, storage, _dir) = create_watcher();
        let ts = storage.save_rules(&[gaming_rule()]).unwrap();

        assert!(watcher.poll());
        assert_eq!(watcher.last_seen(), Some(ts));
        assert!(watcher.matcher.should_block("roblox-gaming.net"));

        // Unchanged timestamp means no reload.
        assert!(!watcher.poll());
    }

    #[test]
    fn test_corrupt_rules_keep_previous_set() {
        let (watcher, storage, _dir) = create_watcher();
        let ts = storage.save_rules(&[gaming_rule()]).unwrap();
        assert!(watcher.load_initial());

        std::fs::write(storage.rules_path(), "{ not json").unwrap();
        std::fs::write(storage.timestamp_path(), (ts + 10).to_string()).unwrap();

        assert!(!watcher.poll());
        assert_eq!(watcher.last_seen(), Some(ts));
        assert_eq!(watcher.matcher.store().len(), 1);

        // Repaired file is picked up on the next tick.
        storage.save_rules(&[]).unwrap();
        assert!(watcher.poll());
        assert!(watcher.matcher.store().is_empty());
    }

    #[tokio::test]
    async fn test_background_polling() {
        let (watcher, storage, _dir) = create_watcher();
        let watcher = Arc::new(watcher);
        let task = tokio::spawn(watcher.clone().start_polling());

        storage.save_rules(&[gaming_rule()]).unwrap();
        for _ in 0..100 {
            if watcher.last_seen().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        task.abort();

        assert_eq!(watcher.matcher.store().len(), 1);
    }
}
