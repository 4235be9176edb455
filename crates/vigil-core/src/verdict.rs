//! Three-way flow verdicts for content-filter integrations.
//!
//! A flow is first checked by the [`RuleMatcher`]. If that allows it, the
//! categorizer's cached categories are consulted. When blocking rules exist
//! but the host has never been categorized, the verdict is
//! [`FlowVerdict::NeedMoreRules`] and [`FlowEvaluator::resolve`] can finish
//! the decision over the network.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::categorizer::{blocking_rule_for, DomainCategorizer};
use crate::matcher::{clean_hostname, RuleMatcher};
use crate::rules::Rule;

/// Verdict for one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowVerdict {
    /// Let the flow through.
    Allow,
    /// Drop the flow before any content is delivered.
    Drop,
    /// The cheap checks could not decide.
    NeedMoreRules,
}

impl FlowVerdict {
    /// Wire name of the verdict.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowVerdict::Allow => "allow",
            FlowVerdict::Drop => "drop",
            FlowVerdict::NeedMoreRules => "needMoreRules",
        }
    }
}

impl fmt::Display for FlowVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stage produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    /// Deterministic hostname matcher.
    Matcher,
    /// Host categories from the inference endpoint.
    Categorizer,
    /// No stage matched.
    Default,
}

/// A verdict plus the rule behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowDecision {
    /// The verdict.
    pub verdict: FlowVerdict,
    /// The rule that caused a drop.
    pub rule: Option<Rule>,
    /// Stage that decided.
    pub source: DecisionSource,
}

impl FlowDecision {
    fn allow(source: DecisionSource) -> Self {
        Self {
            verdict: FlowVerdict::Allow,
            rule: None,
            source,
        }
    }

    fn drop(rule: Rule, source: DecisionSource) -> Self {
        Self {
            verdict: FlowVerdict::Drop,
            rule: Some(rule),
            source,
        }
    }

    /// Returns true for a drop.
    pub fn is_drop(&self) -> bool {
        self.verdict == FlowVerdict::Drop
    }
}

/// Matcher first, categorizer second.
#[derive(Debug, Clone)]
pub struct FlowEvaluator {
    matcher: RuleMatcher,
    categorizer: Option<DomainCategorizer>,
}

impl FlowEvaluator {
    /// Creates an evaluator. Without a categorizer it never returns
    /// `NeedMoreRules`.
    pub fn new(matcher: RuleMatcher, categorizer: Option<DomainCategorizer>) -> Self {
        Self {
            matcher,
            categorizer,
        }
    }

    /// The matcher.
    pub fn matcher(&self) -> &RuleMatcher {
        &self.matcher
    }

    /// The categorizer, if configured.
    pub fn categorizer(&self) -> Option<&DomainCategorizer> {
        self.categorizer.as_ref()
    }

    /// Decides from local state only. Never touches the network.
    pub fn evaluate(&self, hostname: &str) -> FlowDecision {
        let host = clean_hostname(hostname);
        if host.is_empty() {
            return FlowDecision::allow(DecisionSource::Default);
        }

        if let Some(rule) = self.matcher.blocking_rule(&host) {
            return FlowDecision::drop(rule, DecisionSource::Matcher);
        }

        let Some(categorizer) = &self.categorizer else {
            return FlowDecision::allow(DecisionSource::Matcher);
        };

        let snapshot = self.matcher.store().snapshot();
        if !snapshot.has_blocking_rules() {
            return FlowDecision::allow(DecisionSource::Matcher);
        }

        match categorizer.cached_categories(&host) {
            Some(categories) => match blocking_rule_for(&categories, &snapshot.rules) {
                Some(rule) => FlowDecision::drop(rule.clone(), DecisionSource::Categorizer),
                None => FlowDecision::allow(DecisionSource::Categorizer),
            },
            None => FlowDecision {
                verdict: FlowVerdict::NeedMoreRules,
                rule: None,
                source: DecisionSource::Default,
            },
        }
    }

    /// Like [`evaluate`](Self::evaluate), but categorizes the host when the
    /// local state is not enough. Categorization failure allows.
    pub async fn resolve(&self, hostname: &str) -> FlowDecision {
        let decision = self.evaluate(hostname);
        if decision.verdict != FlowVerdict::NeedMoreRules {
            return decision;
        }

        let Some(categorizer) = &self.categorizer else {
            return FlowDecision::allow(DecisionSource::Default);
        };

        match categorizer.categorize(hostname).await {
            Ok(categories) => {
                let snapshot = self.matcher.store().snapshot();
                match blocking_rule_for(&categories, &snapshot.rules) {
                    Some(rule) => FlowDecision::drop(rule.clone(), DecisionSource::Categorizer),
                    None => FlowDecision::allow(DecisionSource::Categorizer),
                }
            }
            Err(e) => {
                warn!(hostname, error = %e, "Categorization failed, allowing flow");
                FlowDecision::allow(DecisionSource::Default)
            }
        }
    }
}
