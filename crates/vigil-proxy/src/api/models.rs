//! API request and response models.

use serde::{Deserialize, Serialize};
use vigil_core::{AnalysisResult, FilterEvent, Rule, RuleAction};

/// Query parameters for GET /api/health.
#[derive(Debug, Default, Deserialize)]
pub struct HealthQuery {
    /// Also check that the inference endpoint answers.
    #[serde(default)]
    pub deep: bool,
}

/// Response body for GET /api/health.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `ok` when the server answers.
    pub status: String,
    /// Number of active rules.
    pub active_rules: usize,
    /// Whether the inference endpoint answered. Only present for deep checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_available: Option<bool>,
}

/// Response body for GET /api/rules.
#[derive(Debug, Serialize)]
pub struct RulesResponse {
    /// Every loaded rule, active or not.
    pub rules: Vec<Rule>,
}

/// Query parameters for GET /api/events.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Maximum number of events to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Response body for GET /api/events.
#[derive(Debug, Serialize)]
pub struct EventsResponse {
    /// Events, newest first.
    pub events: Vec<FilterEvent>,
}

/// Request body for POST /api/analyze.
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Where the content came from.
    pub url: Option<String>,
    /// Text to analyze.
    #[serde(default)]
    pub content: String,
}

/// Response body for POST /api/analyze.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    /// Whether any rule is violated.
    pub violated: bool,
    /// The violated rules.
    pub violated_rules: Vec<Rule>,
    /// The verdict behind the answer.
    pub analysis: AnalysisResult,
    /// What the caller should do.
    pub action: RuleAction,
}
