//! Controller-side commands: rule maintenance and event review.
//!
//! Output goes to a caller-supplied writer so the commands can be tested
//! without a terminal.

use std::io::Write;

use anyhow::{bail, Context, Result};
use tracing::info;
use vigil_core::{InferenceClient, Rule, RuleSet};
use vigil_storage::SharedStorage;

fn load_set(storage: &SharedStorage) -> Result<RuleSet> {
    let rules = storage.load_rules().context("Failed to load rules")?;
    Ok(RuleSet::from_rules(rules))
}

fn save_set(storage: &SharedStorage, set: RuleSet) -> Result<u64> {
    storage
        .save_rules(&set.into_rules())
        .context("Failed to save rules")
}

fn format_rule(rule: &Rule) -> String {
    let actions: Vec<&str> = rule.actions.iter().map(|a| a.as_str()).collect();
    let categories: Vec<&str> = rule.categories.iter().map(String::as_str).collect();
    format!(
        "{}  [{}]  {:<8}  {:<12}  {}  ({})",
        rule.id,
        if rule.is_active { "on " } else { "off" },
        rule.severity.as_str(),
        actions.join(","),
        rule.description_text,
        categories.join(", "),
    )
}

/// `vigil rules list`
pub fn list_rules(storage: &SharedStorage, out: &mut impl Write) -> Result<()> {
    let set = load_set(storage)?;
    if set.is_empty() {
        writeln!(out, "No rules.")?;
        return Ok(());
    }
    for rule in &set.rules {
        writeln!(out, "{}", format_rule(rule))?;
    }
    Ok(())
}

/// `vigil rules add <text>`: the model turns the text into a rule.
pub async fn add_rule(
    storage: &SharedStorage,
    client: &InferenceClient,
    text: &str,
    out: &mut impl Write,
) -> Result<()> {
    let rule = client
        .parse_rule(text)
        .await
        .context("Could not turn the description into a rule")?;

    let mut set = load_set(storage)?;
    writeln!(out, "Added {}", format_rule(&rule))?;
    info!(rule_id = %rule.id, "Rule added");
    set.add(rule);
    save_set(storage, set)?;
    Ok(())
}

/// `vigil rules toggle <id>`
pub fn toggle_rule(storage: &SharedStorage, id: &str, out: &mut impl Write) -> Result<()> {
    let mut set = load_set(storage)?;
    let Some(active) = set.toggle(id) else {
        bail!("No rule with id {id}");
    };
    save_set(storage, set)?;
    writeln!(out, "{id} is now {}", if active { "active" } else { "inactive" })?;
    Ok(())
}

/// `vigil rules remove <id>`
pub fn remove_rule(storage: &SharedStorage, id: &str, out: &mut impl Write) -> Result<()> {
    let mut set = load_set(storage)?;
    let Some(rule) = set.remove(id) else {
        bail!("No rule with id {id}");
    };
    save_set(storage, set)?;
    writeln!(out, "Removed {}: {}", rule.id, rule.description_text)?;
    Ok(())
}

/// `vigil events`: newest first.
pub fn show_events(storage: &SharedStorage, limit: usize, out: &mut impl Write) -> Result<()> {
    let events = storage.load_events().context("Failed to read events")?;
    if events.is_empty() {
        writeln!(out, "No events.")?;
        return Ok(());
    }
    for event in events.iter().rev().take(limit) {
        writeln!(
            out,
            "{}  {:<7}  {:<30}  {:<8}  {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.action.as_str(),
            event.hostname,
            event.source_app,
            event.rule_description,
        )?;
    }
    Ok(())
}

/// `vigil events --clear`
pub fn clear_events(storage: &SharedStorage, out: &mut impl Write) -> Result<()> {
    storage.clear_events().context("Failed to clear events")?;
    writeln!(out, "Events cleared.")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vigil_core::{EventAction, FilterEvent, RuleAction, Severity};

    fn create_storage() -> (SharedStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = SharedStorage::open(dir.path()).unwrap();
        (storage, dir)
    }

    fn gambling_rule() -> Rule {
        Rule::new("No gambling", ["gambling"], [RuleAction::Block], Severity::High)
            .with_id("rule_gambling")
    }

    fn output(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    // ==================== Rules Tests ====================

    #[test]
    fn list_without_rules() {
        let (storage, _dir) = create_storage();
        assert_eq!(output(|o| list_rules(&storage, o)), "No rules.\n");
    }

    #[test]
    fn list_shows_rule_fields() {
        let (storage, _dir) = create_storage();
        storage.save_rules(&[gambling_rule()]).unwrap();

        let text = output(|o| list_rules(&storage, o));
        assert!(text.contains("rule_gambling"));
        assert!(text.contains("[on ]"));
        assert!(text.contains("block"));
        assert!(text.contains("No gambling"));
    }

    #[test]
    fn toggle_persists_and_bumps_timestamp() {
        let (storage, _dir) = create_storage();
        let before = storage.save_rules(&[gambling_rule()]).unwrap();

        let text = output(|o| toggle_rule(&storage, "rule_gambling", o));
        assert_eq!(text, "rule_gambling is now inactive\n");
        assert!(!storage.load_rules().unwrap()[0].is_active);
        assert!(storage.change_timestamp().unwrap().unwrap() > before);
    }

    #[test]
    fn unknown_id_is_an_error() {
        let (storage, _dir) = create_storage();
        storage.save_rules(&[gambling_rule()]).unwrap();

        let mut sink = Vec::new();
        assert!(toggle_rule(&storage, "rule_missing", &mut sink).is_err());
        assert!(remove_rule(&storage, "rule_missing", &mut sink).is_err());
        assert_eq!(storage.load_rules().unwrap().len(), 1);
    }

    #[test]
    fn remove_deletes_rule() {
        let (storage, _dir) = create_storage();
        storage.save_rules(&[gambling_rule()]).unwrap();

        let text = output(|o| remove_rule(&storage, "rule_gambling", o));
        assert!(text.starts_with("Removed rule_gambling"));
        assert!(storage.load_rules().unwrap().is_empty());
    }

    // ==================== Events Tests ====================

    #[test]
    fn events_newest_first_with_limit() {
        let (storage, _dir) = create_storage();
        for host in ["first.com", "second.com", "third.com"] {
            storage
                .append_event(&FilterEvent::new(EventAction::Blocked, host, "proxy", "r"))
                .unwrap();
        }

        let text = output(|o| show_events(&storage, 2, o));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("third.com"));
        assert!(lines[1].contains("second.com"));
    }

    #[test]
    fn clear_empties_log() {
        let (storage, _dir) = create_storage();
        storage
            .append_event(&FilterEvent::new(EventAction::Allowed, "a.com", "api", "r"))
            .unwrap();

        output(|o| clear_events(&storage, o));
        assert_eq!(output(|o| show_events(&storage, 10, o)), "No events.\n");
    }
}
