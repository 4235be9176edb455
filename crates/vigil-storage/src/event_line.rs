//! Pipe-delimited event log lines.
//!
//! `timestamp|action|hostname|sourceApp|ruleDescription`, with the timestamp
//! in RFC 3339. Field separators and line breaks inside a field are
//! replaced so one event is always exactly one line.

use chrono::{DateTime, SecondsFormat, Utc};
use vigil_core::{EventAction, FilterEvent};

const SEPARATOR: char = '|';

/// Makes a value safe to embed as a single field.
pub fn sanitize_field(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '|' => '/',
            '\r' | '\n' => ' ',
            other => other,
        })
        .collect()
}

/// Formats one event as a log line, without the trailing newline.
pub fn format_event(event: &FilterEvent) -> String {
    format!(
        "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
        event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        event.action.as_str(),
        sanitize_field(&event.hostname),
        sanitize_field(&event.source_app),
        sanitize_field(&event.rule_description),
    )
}

/// Parses one log line. Returns `None` for malformed or truncated lines.
pub fn parse_event(line: &str) -> Option<FilterEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = line.splitn(5, SEPARATOR);

    let timestamp = DateTime::parse_from_rfc3339(fields.next()?)
        .ok()?
        .with_timezone(&Utc);
    let action = EventAction::parse(fields.next()?)?;
    let hostname = fields.next()?.to_string();
    let source_app = fields.next()?.to_string();
    let rule_description = fields.next()?.to_string();

    Some(FilterEvent {
        timestamp,
        action,
        hostname,
        source_app,
        rule_description,
    })
}
