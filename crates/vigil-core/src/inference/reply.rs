//! Extraction and validation of the JSON object embedded in a model reply.
//!
//! Models wrap JSON in code fences or chatter around it. The reply is
//! cleaned, the text between the first `{` and the last `}` is parsed, and
//! each field is checked against its declared shape.
//!
//! ## Field Policy
//!
//! | Operation | Field | Missing | Unrecognised |
//! |-----------|-------|---------|--------------|
//! | analysis | `violation` | failure | failure |
//! | analysis | `severity` | failure | failure (including empty) |
//! | analysis | `explanation` | failure | failure |
//! | analysis | `categories` | failure | failure; non-string items dropped |
//! | analysis | `recommendedAction` | failure | coerced to `log` |
//! | rule | `categories` | failure | failure if empty |
//! | rule | `actions` | failure | each unknown item coerced to `alert` |
//! | rule | `severity` | `medium` | `medium` |
//! | categorize | `categories` | failure | failure |

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::analysis::AnalysisResult;
use crate::error::{InferenceError, Result};
use crate::rules::{normalize_categories, Rule, RuleAction, Severity};

type Object = Map<String, Value>;

/// Removes Markdown code-fence markers (```` ``` ```` and ```` ```json ````).
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
}

/// Returns the substring between the first `{` and the last `}`.
pub fn extract_json_object(text: &str) -> Result<String> {
    let cleaned = strip_code_fences(text);
    let start = cleaned.find('{');
    let end = cleaned.rfind('}');

    match (start, end) {
        (Some(start), Some(end)) if end > start => Ok(cleaned[start..=end].to_string()),
        _ => Err(InferenceError::Validation(
            "reply contains no JSON object".to_string(),
        )),
    }
}

fn parse_object(text: &str) -> Result<Object> {
    let json = extract_json_object(text)?;
    match serde_json::from_str::<Value>(&json) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(InferenceError::Validation(
            "reply JSON is not an object".to_string(),
        )),
        Err(e) => Err(InferenceError::Validation(format!("malformed JSON: {e}"))),
    }
}

fn missing(field: &str) -> InferenceError {
    InferenceError::Validation(format!("missing field `{field}`"))
}

fn wrong_shape(field: &str, expected: &str) -> InferenceError {
    InferenceError::Validation(format!("field `{field}` is not {expected}"))
}

fn required_bool(object: &Object, field: &str) -> Result<bool> {
    match object.get(field) {
        None | Some(Value::Null) => Err(missing(field)),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(wrong_shape(field, "a boolean")),
    }
}

fn required_str<'a>(object: &'a Object, field: &str) -> Result<&'a str> {
    match object.get(field) {
        None | Some(Value::Null) => Err(missing(field)),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(wrong_shape(field, "a string")),
    }
}

/// String items of a required array; non-string items are dropped.
fn required_str_array(object: &Object, field: &str) -> Result<Vec<String>> {
    match object.get(field) {
        None | Some(Value::Null) => Err(missing(field)),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()),
        Some(_) => Err(wrong_shape(field, "an array")),
    }
}

/// Validates an analysis reply.
pub fn parse_analysis(text: &str) -> Result<AnalysisResult> {
    let object = parse_object(text)?;

    let violation = required_bool(&object, "violation")?;

    let severity_raw = required_str(&object, "severity")?;
    let severity = Severity::parse(severity_raw).ok_or_else(|| {
        InferenceError::Validation(format!("unknown severity {severity_raw:?}"))
    })?;

    let explanation = required_str(&object, "explanation")?.trim().to_string();
    let categories = required_str_array(&object, "categories")?;

    let action_raw = required_str(&object, "recommendedAction")?;
    let recommended_action = RuleAction::parse(action_raw).unwrap_or_else(|| {
        tracing::debug!(action = action_raw, "Coercing unknown recommendedAction to log");
        RuleAction::Log
    });

    Ok(AnalysisResult {
        violation,
        severity,
        explanation,
        categories,
        recommended_action,
    })
}

/// Validates a rule-parsing reply, producing a new active rule that keeps
/// the parent's original wording.
pub fn parse_rule(text: &str, description: &str) -> Result<Rule> {
    let object = parse_object(text)?;

    let categories = normalize_categories(required_str_array(&object, "categories")?);
    if categories.is_empty() {
        return Err(InferenceError::Validation(
            "rule has no categories".to_string(),
        ));
    }

    let mut actions: Vec<RuleAction> = match object.get("actions") {
        None | Some(Value::Null) => return Err(missing("actions")),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .and_then(RuleAction::parse)
                    .unwrap_or(RuleAction::Alert)
            })
            .collect(),
        Some(_) => return Err(wrong_shape("actions", "an array")),
    };
    if actions.is_empty() {
        actions.push(RuleAction::Alert);
    }

    let severity = object
        .get("severity")
        .and_then(Value::as_str)
        .and_then(Severity::parse)
        .unwrap_or(Severity::Medium);

    Ok(Rule::new(description.trim(), categories, actions, severity))
}

/// Validates a categorization reply.
pub fn parse_categories(text: &str) -> Result<Vec<String>> {
    let object = parse_object(text)?;
    let categories = required_str_array(&object, "categories")?;
    let mut seen = HashSet::new();
    Ok(categories
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect())
}
