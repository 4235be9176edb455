//! API route handlers.

use axum::extract::{Query, State};
use axum::Json;
use tracing::{debug, info, warn};
use vigil_core::categorizer::rules_for_categories;
use vigil_core::{clean_hostname, AnalysisResult, EventAction, FilterEvent};

use super::error::{ApiError, Result};
use super::models::{
    AnalyzeRequest, AnalyzeResponse, EventsQuery, EventsResponse, HealthQuery, HealthResponse,
    RulesResponse,
};
use crate::state::ProxyState;

const API_SOURCE: &str = "api";

/// GET /api/health - Liveness, with an optional inference check.
pub async fn health(
    State(state): State<ProxyState>,
    Query(query): Query<HealthQuery>,
) -> Json<HealthResponse> {
    let inference_available = if query.deep {
        match &state.inference {
            Some(client) => Some(client.is_available().await),
            None => Some(false),
        }
    } else {
        None
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        active_rules: state.active_rules().len(),
        inference_available,
    })
}

/// GET /api/rules - Every loaded rule.
pub async fn list_rules(State(state): State<ProxyState>) -> Json<RulesResponse> {
    Json(RulesResponse {
        rules: state.matcher.store().rules(),
    })
}

/// GET /api/events - Most recent events, newest first.
pub async fn list_events(
    State(state): State<ProxyState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>> {
    let mut events = state.storage.load_events()?;
    events.reverse();
    events.truncate(query.limit);
    Ok(Json(EventsResponse { events }))
}

/// POST /api/analyze - Judge a piece of content against the active rules.
///
/// The matcher runs first on the URL's host. Unless it already blocks, the
/// inference endpoint is asked too and its verdict is merged with the
/// matcher's; if that fails the matcher verdict stands.
pub async fn analyze(
    State(state): State<ProxyState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>> {
    let host = req
        .url
        .as_deref()
        .map(clean_hostname)
        .filter(|h| !h.is_empty());

    if req.content.trim().is_empty() && host.is_none() {
        return Err(ApiError::BadRequest(
            "either content or url is required".to_string(),
        ));
    }

    debug!(hostname = ?host, content_len = req.content.len(), "Analyzing content");

    let matched = host
        .as_deref()
        .map(|h| state.matcher.matching_rules(h))
        .unwrap_or_default();
    let fast = AnalysisResult::from_matched_rules(&matched);

    let (analysis, violated_rules) = if fast.should_block() || req.content.trim().is_empty() {
        (fast, matched)
    } else {
        match &state.inference {
            Some(client) => {
                let rules = state.active_rules();
                match client.analyze_content(&req.content, &rules).await {
                    Ok(result) => {
                        let mut violated = matched;
                        if result.violation {
                            for rule in rules_for_categories(&result.categories, &rules) {
                                if !violated.iter().any(|r| r.id == rule.id) {
                                    violated.push(rule.clone());
                                }
                            }
                            if let (Some(h), Some(categorizer)) = (&host, &state.categorizer) {
                                categorizer.remember(h, &result.categories);
                            }
                        }
                        (fast.merge(result), violated)
                    }
                    Err(e) => {
                        warn!(error = %e, "Content analysis failed, using rules only");
                        (fast, matched)
                    }
                }
            }
            None => (fast, matched),
        }
    };

    if analysis.violation {
        let action = if analysis.should_block() {
            EventAction::Blocked
        } else {
            EventAction::Allowed
        };
        let description = violated_rules
            .first()
            .map(|r| r.description_text.clone())
            .unwrap_or_else(|| analysis.explanation.clone());
        state
            .record(FilterEvent::new(
                action,
                host.clone().unwrap_or_default(),
                API_SOURCE,
                description,
            ))
            .await;
        info!(
            hostname = ?host,
            action = %analysis.recommended_action,
            "Content violates rules"
        );
    }

    Ok(Json(AnalyzeResponse {
        violated: analysis.violation,
        violated_rules,
        action: analysis.recommended_action,
        analysis,
    }))
}
