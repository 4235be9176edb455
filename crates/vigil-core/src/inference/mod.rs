//! AI-assisted classification against a local inference endpoint.
//!
//! ## Protocol
//!
//! Each operation sends `POST {endpoint}/api/generate` with
//! `{model, prompt, stream: false, temperature, images?}` and reads the
//! model's raw text from `{response}`. The JSON object embedded in that text
//! is extracted and validated by [`reply`]. Request, extraction and
//! validation run together inside a bounded [`RetryPolicy`].

mod client;
mod config;
pub mod prompt;
pub mod reply;

pub use client::InferenceClient;
pub use config::{
    InferenceConfig, RetryPolicy, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
};

/// In-process stand-in for the inference endpoint.
#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use super::{InferenceConfig, RetryPolicy};

    /// One scripted answer to `POST /api/generate`.
    pub(crate) enum Reply {
        /// 200 with `{response: text}`.
        Text(String),
        /// Bare HTTP status.
        Status(u16),
    }

    impl Reply {
        pub(crate) fn text(text: impl Into<String>) -> Self {
            Reply::Text(text.into())
        }
    }

    #[derive(Clone, Default)]
    struct Shared {
        replies: Arc<Mutex<VecDeque<Reply>>>,
        hits: Arc<AtomicUsize>,
        last_request: Arc<Mutex<Option<Value>>>,
    }

    pub(crate) struct FakeEndpoint {
        url: String,
        shared: Shared,
    }

    impl FakeEndpoint {
        /// Serves `replies` in order; once they run out every request gets
        /// an unparseable reply.
        pub(crate) async fn start(replies: Vec<Reply>) -> Self {
            let shared = Shared {
                replies: Arc::new(Mutex::new(replies.into())),
                ..Shared::default()
            };

            let app = Router::new()
                .route("/api/generate", post(generate))
                .route("/api/tags", get(|| async { Json(json!({ "models": [] })) }))
                .with_state(shared.clone());

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                url: format!("http://{addr}"),
                shared,
            }
        }

        /// Client configuration pointing at this endpoint with a short delay.
        pub(crate) fn config(&self) -> InferenceConfig {
            InferenceConfig::default()
                .with_endpoint(self.url.clone())
                .with_retry(RetryPolicy::new(3, Duration::from_millis(10)))
        }

        pub(crate) fn hits(&self) -> usize {
            self.shared.hits.load(Ordering::SeqCst)
        }

        pub(crate) fn last_request(&self) -> Option<Value> {
            self.shared.last_request.lock().clone()
        }
    }

    async fn generate(State(shared): State<Shared>, Json(body): Json<Value>) -> Response {
        shared.hits.fetch_add(1, Ordering::SeqCst);
        *shared.last_request.lock() = Some(body);

        match shared.replies.lock().pop_front() {
            Some(Reply::Text(text)) => Json(json!({ "response": text })).into_response(),
            Some(Reply::Status(code)) => StatusCode::from_u16(code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                .into_response(),
            None => Json(json!({ "response": "no scripted reply" })).into_response(),
        }
    }

    /// Configuration for an endpoint nobody listens on.
    pub(crate) async fn unreachable_config() -> InferenceConfig {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        InferenceConfig::default()
            .with_endpoint(format!("http://{addr}"))
            .with_retry(RetryPolicy::new(3, Duration::from_millis(10)))
    }
}
