//! Vigil Core - rule model, hostname matching, and AI-assisted classification.
//!
//! This crate holds everything the enforcement and controller processes
//! share:
//!
//! - The rule and verdict model ([`Rule`], [`AnalysisResult`], [`FilterEvent`])
//! - The deterministic hostname matcher ([`RuleMatcher`]) over a shared
//!   [`RuleStore`]
//! - The inference client ([`InferenceClient`]) with bounded retries
//! - The per-host categorizer ([`DomainCategorizer`])
//! - Three-way flow verdicts ([`FlowEvaluator`])
//!
//! ## Architecture
//!
//! ```text
//! hostname ─▶ RuleMatcher ──block──▶ Drop
//!                  │
//!                allow
//!                  ▼
//!          cached categories? ──overlap──▶ Drop
//!                  │
//!          none, blocking rules exist ──▶ NeedMoreRules ─▶ DomainCategorizer
//!                  │
//!                  ▼
//!                Allow
//! ```
//!
//! # Example
//!
//! ```
//! use vigil_core::{Rule, RuleAction, RuleMatcher, Severity};
//!
//! let matcher = RuleMatcher::new();
//! matcher.load(vec![Rule::new(
//!     "No violent games",
//!     ["violence"],
//!     [RuleAction::Block],
//!     Severity::High,
//! )]);
//!
//! assert!(matcher.should_block("violent-game.com"));
//! assert!(!matcher.should_block("library.org"));
//! ```

pub mod analysis;
pub mod cache;
pub mod categorizer;
pub mod error;
pub mod inference;
pub mod matcher;
pub mod patterns;
pub mod rules;
pub mod store;
pub mod verdict;

pub use analysis::{AnalysisResult, EventAction, FilterEvent};
pub use cache::{HostCache, DEFAULT_CACHE_CAPACITY};
pub use categorizer::{DomainCategorizer, LookupClaim};
pub use error::{ConfigError, InferenceError, Result};
pub use inference::{InferenceClient, InferenceConfig, RetryPolicy};
pub use matcher::{clean_hostname, RuleMatcher};
pub use patterns::PatternTable;
pub use rules::{Rule, RuleAction, RuleSet, Severity};
pub use store::{RuleSnapshot, RuleStore};
pub use verdict::{DecisionSource, FlowDecision, FlowEvaluator, FlowVerdict};
