//! Prompt builders.
//!
//! Every prompt spells out the exact JSON schema and the allowed enum values
//! so replies can be validated strictly.

use crate::rules::Rule;

const ANALYSIS_SCHEMA: &str = r#"Respond with exactly one JSON object and nothing else, using this schema:
{
  "violation": true or false,
  "severity": one of "low", "medium", "high", "critical",
  "explanation": a short string,
  "categories": an array of lower-case category strings,
  "recommendedAction": one of "block", "alert", "log", "redirect"
}"#;

/// Prompt turning a parent's free-text rule into structured fields.
pub fn parse_rule_prompt(text: &str) -> String {
    format!(
        r#"You convert a parent's content rule into structured data for a family content filter.

Rule: "{text}"

Respond with exactly one JSON object and nothing else, using this schema:
{{
  "categories": an array of short lower-case content categories (for example "violence", "gambling", "social media", "adult", "gaming"),
  "actions": an array containing any of "block", "alert", "log", "redirect",
  "severity": one of "low", "medium", "high", "critical"
}}"#
    )
}

/// Prompt asking whether `content` violates any of `rules`.
pub fn analyze_content_prompt(content: &str, rules: &[Rule]) -> String {
    format!(
        "You are a content filter for a family. Decide whether the content below violates any of the rules.\n\n\
         Rules:\n{}\n\nContent:\n\"\"\"\n{content}\n\"\"\"\n\n{ANALYSIS_SCHEMA}",
        format_rules(rules)
    )
}

/// Prompt asking whether an attached screenshot violates any of `rules`.
pub fn analyze_image_prompt(rules: &[Rule]) -> String {
    format!(
        "You are a content filter for a family. Look at the attached screenshot and decide whether \
         what is shown violates any of the rules.\n\nRules:\n{}\n\n{ANALYSIS_SCHEMA}",
        format_rules(rules)
    )
}

/// Prompt asking for the content categories of a website.
pub fn categorize_prompt(hostname: &str) -> String {
    format!(
        r#"Classify the website "{hostname}" into content categories.

Respond with exactly one JSON object and nothing else, using this schema:
{{
  "categories": an array of short lower-case category strings (for example "social media", "gaming", "adult", "gambling", "news", "education", "video", "shopping")
}}"#
    )
}

fn format_rules(rules: &[Rule]) -> String {
    if rules.is_empty() {
        return "- (no rules)".to_string();
    }

    rules
        .iter()
        .map(|rule| {
            let categories: Vec<&str> = rule.categories.iter().map(String::as_str).collect();
            let actions: Vec<&str> = rule.actions.iter().map(|a| a.as_str()).collect();
            format!(
                "- {} [categories: {}; actions: {}; severity: {}]",
                rule.description_text,
                categories.join(", "),
                actions.join(", "),
                rule.severity
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleAction, Severity};

    #[test]
    fn analysis_prompt_spells_out_enums() {
        let prompt = analyze_content_prompt("hello", &[]);
        assert!(prompt.contains(r#""low", "medium", "high", "critical""#));
        assert!(prompt.contains(r#""block", "alert", "log", "redirect""#));
        assert!(prompt.contains("recommendedAction"));
    }

    #[test]
    fn analysis_prompt_lists_rules() {
        let rule = Rule::new("No gambling", ["gambling"], [RuleAction::Block], Severity::High);
        let prompt = analyze_content_prompt("poker tips", &[rule]);
        assert!(prompt.contains("- No gambling [categories: gambling; actions: block; severity: high]"));
        assert!(prompt.contains("poker tips"));
    }

    #[test]
    fn rule_prompt_embeds_text() {
        let prompt = parse_rule_prompt("no scary videos");
        assert!(prompt.contains("no scary videos"));
        assert!(prompt.contains("\"actions\""));
    }

    #[test]
    fn categorize_prompt_names_host() {
        assert!(categorize_prompt("roblox.com").contains("\"roblox.com\""));
    }
}
