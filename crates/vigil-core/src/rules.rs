//! Parent-defined filtering rules.
//!
//! A rule couples free-text category tokens (interpreted by the
//! [`RuleMatcher`](crate::matcher::RuleMatcher) through its pattern table)
//! with a set of actions and a severity. Rules are immutable once created
//! except for the active flag; an inactive rule never contributes to a
//! verdict.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Action a rule requests when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Stop the flow before content is delivered.
    Block,
    /// Deliver, but notify the parent.
    Alert,
    /// Deliver and record an event.
    Log,
    /// Send the client somewhere else.
    Redirect,
}

impl RuleAction {
    /// Returns all actions.
    pub fn all() -> &'static [RuleAction] {
        &[
            RuleAction::Block,
            RuleAction::Alert,
            RuleAction::Log,
            RuleAction::Redirect,
        ]
    }

    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Block => "block",
            RuleAction::Alert => "alert",
            RuleAction::Log => "log",
            RuleAction::Redirect => "redirect",
        }
    }

    /// Parses an action, ignoring case and surrounding whitespace.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "block" => Some(RuleAction::Block),
            "alert" => Some(RuleAction::Alert),
            "log" => Some(RuleAction::Log),
            "redirect" => Some(RuleAction::Redirect),
            _ => None,
        }
    }
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How serious a violation of the rule is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Returns all severities, least severe first.
    pub fn all() -> &'static [Severity] {
        &[
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ]
    }

    /// Wire name of the severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Parses a severity, ignoring case and surrounding whitespace.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single filtering rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Unique identifier.
    pub id: String,
    /// The parent's original wording.
    pub description_text: String,
    /// Free-text category tokens, lower-cased.
    pub categories: BTreeSet<String>,
    /// Actions to take on a match.
    pub actions: BTreeSet<RuleAction>,
    /// Severity of a violation.
    pub severity: Severity,
    /// Whether the rule currently participates in verdicts.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Rule {
    /// Creates an active rule with a fresh id.
    ///
    /// Category tokens are trimmed and lower-cased; empty tokens are dropped.
    pub fn new<C, S>(
        description_text: impl Into<String>,
        categories: C,
        actions: impl IntoIterator<Item = RuleAction>,
        severity: Severity,
    ) -> Self
    where
        C: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            id: generate_rule_id(),
            description_text: description_text.into(),
            categories: normalize_categories(categories),
            actions: actions.into_iter().collect(),
            severity,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Returns a copy with the active flag set.
    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Returns a copy with the given id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Returns true if this rule asks for the flow to be stopped.
    pub fn blocks(&self) -> bool {
        self.actions.contains(&RuleAction::Block)
    }

    /// The most restrictive action on the rule, by declaration order.
    pub fn primary_action(&self) -> Option<RuleAction> {
        self.actions.iter().next().copied()
    }
}

/// Trims, lower-cases and de-duplicates category tokens.
pub fn normalize_categories<C, S>(categories: C) -> BTreeSet<String>
where
    C: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    categories
        .into_iter()
        .map(|c| c.as_ref().trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

fn generate_rule_id() -> String {
    format!("rule_{:016x}", rand::random::<u64>())
}

/// An ordered collection of rules, serialized as a plain list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    /// The rules in insertion order.
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Wraps an existing list.
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Iterates over the active rules.
    pub fn active(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.is_active)
    }

    /// Finds a rule by id.
    pub fn find(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Adds a rule.
    pub fn add(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Removes a rule by id.
    pub fn remove(&mut self, id: &str) -> Option<Rule> {
        let pos = self.rules.iter().position(|r| r.id == id)?;
        Some(self.rules.remove(pos))
    }

    /// Flips the active flag of a rule. Returns the new state.
    pub fn toggle(&mut self, id: &str) -> Option<bool> {
        let rule = self.rules.iter_mut().find(|r| r.id == id)?;
        rule.is_active = !rule.is_active;
        Some(rule.is_active)
    }

    /// Number of rules, active or not.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Unwraps into the underlying list.
    pub fn into_rules(self) -> Vec<Rule> {
        self.rules
    }
}
