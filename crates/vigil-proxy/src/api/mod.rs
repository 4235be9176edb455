//! Internal HTTP API served under the API prefix.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Liveness and active rule count (`?deep=true` also
//!   checks the inference endpoint)
//! - `GET /api/rules` - Every loaded rule
//! - `GET /api/events` - Recent events, newest first
//! - `POST /api/analyze` - Judge `{url?, content}` against the active rules

pub mod error;
mod handlers;
pub mod models;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::state::ProxyState;

pub use error::{ApiError, ErrorResponse};

/// Builds the API router.
pub fn router(state: ProxyState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/rules", get(handlers::list_rules))
        .route("/api/events", get(handlers::list_events))
        .route("/api/analyze", post(handlers::analyze))
        .layer(cors)
        .with_state(state)
}
