//! Verdict and event types shared by the matcher, the inference client and
//! the shared-storage log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::{Rule, RuleAction, Severity};

/// A verdict about one piece of content.
///
/// Produced either synthetically by the matcher (fast path) or from a
/// validated model reply (AI path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Whether any rule is violated.
    pub violation: bool,
    /// Severity of the violation.
    pub severity: Severity,
    /// Short human-readable reason.
    pub explanation: String,
    /// Categories the content was judged to belong to.
    pub categories: Vec<String>,
    /// What should happen to the content.
    pub recommended_action: RuleAction,
}

impl AnalysisResult {
    /// A clean verdict.
    pub fn clean() -> Self {
        Self {
            violation: false,
            severity: Severity::Low,
            explanation: "No rule matched".to_string(),
            categories: Vec::new(),
            recommended_action: RuleAction::Log,
        }
    }

    /// Builds the synthetic fast-path verdict from the rules that matched.
    ///
    /// The highest severity wins, and `block` is recommended if any matched
    /// rule blocks.
    pub fn from_matched_rules(rules: &[Rule]) -> Self {
        if rules.is_empty() {
            return Self::clean();
        }

        let severity = rules
            .iter()
            .map(|r| r.severity)
            .max()
            .unwrap_or_default();
        let recommended_action = rules
            .iter()
            .filter_map(Rule::primary_action)
            .min()
            .unwrap_or(RuleAction::Log);
        let mut categories: Vec<String> = rules
            .iter()
            .flat_map(|r| r.categories.iter().cloned())
            .collect();
        categories.sort();
        categories.dedup();

        let names: Vec<&str> = rules.iter().map(|r| r.description_text.as_str()).collect();

        Self {
            violation: true,
            severity,
            explanation: format!("Matched rule(s): {}", names.join("; ")),
            categories,
            recommended_action,
        }
    }

    /// Combines two verdicts on the same content.
    ///
    /// A violation found by either side stands. When both report one, the
    /// higher severity and the stricter action win.
    pub fn merge(self, other: Self) -> Self {
        match (self.violation, other.violation) {
            (false, _) => other,
            (true, false) => self,
            (true, true) => {
                let mut categories = self.categories;
                for category in other.categories {
                    if !categories.contains(&category) {
                        categories.push(category);
                    }
                }
                Self {
                    violation: true,
                    severity: self.severity.max(other.severity),
                    explanation: format!("{}; {}", self.explanation, other.explanation),
                    categories,
                    recommended_action: self.recommended_action.min(other.recommended_action),
                }
            }
        }
    }

    /// Returns true if the verdict asks for a block.
    pub fn should_block(&self) -> bool {
        self.violation && self.recommended_action == RuleAction::Block
    }
}

/// Outcome recorded for a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    /// The flow was stopped.
    Blocked,
    /// The flow was delivered.
    Allowed,
}

impl EventAction {
    /// Log-line representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Blocked => "blocked",
            EventAction::Allowed => "allowed",
        }
    }

    /// Parses the log-line representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blocked" => Some(EventAction::Blocked),
            "allowed" => Some(EventAction::Allowed),
            _ => None,
        }
    }
}

/// One enforcement decision. Append-only once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterEvent {
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// What happened to the flow.
    pub action: EventAction,
    /// Normalized hostname of the flow.
    pub hostname: String,
    /// Application or component that produced the content.
    pub source_app: String,
    /// Description of the rule involved, if any.
    pub rule_description: String,
}

impl FilterEvent {
    /// Creates an event stamped with the current time.
    pub fn new(
        action: EventAction,
        hostname: impl Into<String>,
        source_app: impl Into<String>,
        rule_description: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            hostname: hostname.into(),
            source_app: source_app.into(),
            rule_description: rule_description.into(),
        }
    }

    /// A block event for the given rule.
    pub fn blocked(hostname: impl Into<String>, source_app: impl Into<String>, rule: &Rule) -> Self {
        Self::new(
            EventAction::Blocked,
            hostname,
            source_app,
            rule.description_text.clone(),
        )
    }
}
