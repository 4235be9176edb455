//! The interception server: accept loop and per-connection handling.
//!
//! Each connection carries exactly one request and is closed after the
//! response. Within a connection the matcher verdict always precedes any
//! origin fetch; content classification runs only after delivery.

use std::future::Future;
use std::net::SocketAddr;

use axum::body::Body;
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;
use tracing::{debug, info, warn};
use vigil_core::{EventAction, FilterEvent, FlowVerdict};

use crate::api;
use crate::error::{ProxyError, Result};
use crate::forward::{
    block_response, classify_after_delivery, fetch_origin, is_hop_by_hop, is_textual,
    sample_text, RawResponse, CONNECT_ESTABLISHED,
};
use crate::request::{read_request, RequestHead, Route};
use crate::state::ProxyState;

/// A bound interception server.
#[derive(Debug)]
pub struct InterceptionServer {
    listener: TcpListener,
    state: ProxyState,
    api: Router,
}

impl InterceptionServer {
    /// Binds the configured address. Must be called inside a Tokio runtime.
    pub fn bind(state: ProxyState) -> Result<Self> {
        let addr = state.config.addr;
        let listener = bind_listener(addr)?;
        let api = api::router(state.clone());
        Ok(Self {
            listener,
            state,
            api,
        })
    }

    /// The address actually bound, useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared state used by every connection.
    pub fn state(&self) -> &ProxyState {
        &self.state
    }

    /// Serves until the process ends.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` completes. In-flight connections finish on
    /// their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(addr = %self.local_addr()?, "Interception server listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Interception server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = self.state.clone();
                        let api = self.api.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state, api).await {
                                debug!(peer = %peer, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
            }
        }
    }
}

fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let bind_err = |e| ProxyError::Bind(addr, e);

    // SO_REUSEADDR so a restart is not refused while old sockets linger.
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(128).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(bind_err)
}

async fn handle_connection(mut stream: TcpStream, state: ProxyState, api: Router) -> Result<()> {
    let config = &state.config;
    let read = tokio::time::timeout(
        config.read_timeout,
        read_request(&mut stream, config.max_head_bytes, config.max_body_bytes),
    )
    .await;

    let (head, body) = match read {
        Ok(Ok(request)) => request,
        Ok(Err(ProxyError::BadRequest(reason))) => {
            debug!(reason = %reason, "Rejecting malformed request");
            return respond(&mut stream, RawResponse::text(400, "Bad Request", &reason)).await;
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return respond(
                &mut stream,
                RawResponse::text(408, "Request Timeout", "request not received in time"),
            )
            .await;
        }
    };

    debug!(method = %head.method, target = %head.target, "Request parsed");

    match head.route(&config.api_prefix) {
        Route::Api => {
            let response = serve_api(api, &head, body).await?;
            respond(&mut stream, response).await
        }
        Route::Connect => handle_connect(&mut stream, &state, &head).await,
        Route::Forward => handle_forward(&mut stream, &state, &head, body).await,
    }
}

async fn respond(stream: &mut TcpStream, response: RawResponse) -> Result<()> {
    stream.write_all(&response.to_bytes()).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

/// Hands an API request to the axum router.
async fn serve_api(api: Router, head: &RequestHead, body: Vec<u8>) -> Result<RawResponse> {
    let mut builder = axum::http::Request::builder()
        .method(head.method.as_str())
        .uri(head.target.as_str());
    // The body is already complete, so framing headers no longer apply.
    for (name, value) in head.headers.iter().filter(|(n, _)| !is_hop_by_hop(n)) {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let request = builder
        .body(Body::from(body))
        .map_err(|e| ProxyError::BadRequest(e.to_string()))?;

    let response = match api.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    Ok(RawResponse {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("").to_string(),
        headers,
        body: body.to_vec(),
    })
}

/// Acknowledges a tunnel request, or refuses it when the host is blocked.
/// No tunnel is ever opened.
async fn handle_connect(stream: &mut TcpStream, state: &ProxyState, head: &RequestHead) -> Result<()> {
    let Some(host) = head.hostname() else {
        return respond(stream, RawResponse::text(400, "Bad Request", "missing CONNECT authority")).await;
    };

    let decision = state.evaluator.evaluate(&host);
    if let Some(rule) = decision.rule.as_ref().filter(|_| decision.is_drop()) {
        info!(hostname = %host, rule = %rule.description_text, source = ?decision.source, "Blocked CONNECT");
        state
            .record(FilterEvent::blocked(
                host.as_str(),
                state.config.source_app.as_str(),
                rule,
            ))
            .await;
        return respond(stream, block_response(rule, &host)).await;
    }

    stream.write_all(CONNECT_ESTABLISHED).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

/// Pre-delivery verdict, origin fetch, delivery, then post-delivery
/// classification on its own task.
async fn handle_forward(
    stream: &mut TcpStream,
    state: &ProxyState,
    head: &RequestHead,
    body: Vec<u8>,
) -> Result<()> {
    let Some(host) = head.hostname() else {
        return respond(stream, RawResponse::text(400, "Bad Request", "missing Host header")).await;
    };
    let source_app = state.config.source_app.as_str();

    let decision = state.evaluator.evaluate(&host);
    if let Some(rule) = decision.rule.as_ref().filter(|_| decision.is_drop()) {
        info!(hostname = %host, rule = %rule.description_text, source = ?decision.source, "Blocked before delivery");
        state
            .record(FilterEvent::blocked(host.as_str(), source_app, rule))
            .await;
        return respond(stream, block_response(rule, &host)).await;
    }

    if decision.verdict == FlowVerdict::NeedMoreRules {
        if let Some(claim) = state.categorizer.as_ref().and_then(|c| c.claim_lookup(&host)) {
            tokio::spawn(async move {
                let host = claim.hostname().to_string();
                if let Err(e) = claim.run().await {
                    debug!(hostname = %host, error = %e, "Background categorization failed");
                }
            });
        }
    }

    // Alert and log rules never stop a flow, but the match is recorded.
    if let Some(rule) = state.matcher.matching_rules(&host).first() {
        state
            .record(FilterEvent::new(
                EventAction::Allowed,
                host.as_str(),
                source_app,
                rule.description_text.clone(),
            ))
            .await;
    }

    let response = match fetch_origin(state, head, body).await {
        Ok(response) => response,
        Err(ProxyError::BadRequest(reason)) => {
            return respond(stream, RawResponse::text(400, "Bad Request", &reason)).await;
        }
        Err(e) => {
            warn!(hostname = %host, error = %e, "Origin fetch failed");
            return respond(stream, RawResponse::text(502, "Bad Gateway", "origin unreachable")).await;
        }
    };

    let sample = if state.inference.is_some() && is_textual(response.header("content-type")) {
        sample_text(&response.body, state.config.classify_limit_bytes)
    } else {
        None
    };

    respond(stream, response).await?;

    if let Some(text) = sample {
        tokio::spawn(classify_after_delivery(state.clone(), host, text));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::routing::get;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use vigil_core::{InferenceClient, Rule, RuleAction, Severity};
    use vigil_storage::SharedStorage;

    use crate::config::ProxyConfig;
    use crate::state::test_support::{create_test_state, fake_inference, violence_rule};

    async fn start(state: ProxyState) -> SocketAddr {
        let server = InterceptionServer::bind(state).unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    async fn exchange(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn origin(body: &'static str, content_type: &'static str) -> SocketAddr {
        serve(Router::new().route(
            "/",
            get(move || async move { ([("content-type", content_type)], body) }),
        ))
        .await
    }

    /// Inference endpoint that reports violence for every prompt.
    async fn violent_inference() -> InferenceClient {
        fake_inference(json!({
            "violation": true,
            "severity": "high",
            "explanation": "graphic fighting",
            "categories": ["violence"],
            "recommendedAction": "block"
        }))
        .await
    }

    // ==================== Routing Tests ====================

    #[tokio::test]
    async fn api_requests_are_served_internally() {
        let (state, _dir) = create_test_state(vec![violence_rule()]);
        let addr = start(state).await;

        let response = exchange(addr, "GET /api/health HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains(r#""activeRules":1"#));
    }

    #[tokio::test]
    async fn chunked_api_request_body_arrives_intact() {
        let (state, _dir) = create_test_state(vec![violence_rule()]);
        let addr = start(state).await;

        let json = r#"{"url":"http://violent-game.com","content":"level one"}"#;
        let request = format!(
            "POST /api/analyze HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
             Transfer-Encoding: chunked\r\n\r\n{:x}\r\n{json}\r\n0\r\n\r\n",
            json.len()
        );
        let response = exchange(addr, &request).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains(r#""violated":true"#));
    }

    #[tokio::test]
    async fn connect_is_acknowledged() {
        let (state, _dir) = create_test_state(vec![violence_rule()]);
        let addr = start(state).await;

        let response = exchange(
            addr,
            "CONNECT library.org:443 HTTP/1.1\r\nHost: library.org:443\r\n\r\n",
        )
        .await;
        assert_eq!(response, "HTTP/1.1 200 Connection established\r\n\r\n");
    }

    #[tokio::test]
    async fn connect_to_blocked_host_is_refused() {
        let (state, _dir) = create_test_state(vec![violence_rule()]);
        let storage = state.storage.clone();
        let addr = start(state).await;

        let response = exchange(
            addr,
            "CONNECT violent-game.com:443 HTTP/1.1\r\nHost: violent-game.com:443\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert_eq!(storage.load_events().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_request_gets_400() {
        let (state, _dir) = create_test_state(vec![]);
        let addr = start(state).await;

        let response = exchange(addr, "garbage\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    // ==================== Forwarding Tests ====================

    #[tokio::test]
    async fn blocked_host_gets_block_page_before_delivery() {
        let (state, _dir) = create_test_state(vec![violence_rule()]);
        let storage = state.storage.clone();
        let addr = start(state).await;

        let response = exchange(
            addr,
            "GET http://violent-game.com/ HTTP/1.1\r\nHost: violent-game.com\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(response.contains("X-Vigil-Blocked: true\r\n"));
        assert!(response.contains("No violent games"));

        let events = storage.load_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, EventAction::Blocked);
        assert_eq!(events[0].hostname, "violent-game.com");
        assert_eq!(events[0].source_app, "proxy");
    }

    #[tokio::test]
    async fn allowed_request_is_fetched_from_origin() {
        let origin = origin("hello", "text/plain").await;
        let (state, _dir) = create_test_state(vec![violence_rule()]);
        let storage = state.storage.clone();
        let addr = start(state).await;

        let response = exchange(
            addr,
            &format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\n\r\n"),
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("\r\n\r\nhello"));
        assert!(storage.load_events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_origin_gets_502() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);

        let (state, _dir) = create_test_state(vec![]);
        let addr = start(state).await;

        let response = exchange(addr, &format!("GET http://{dead}/ HTTP/1.1\r\nHost: {dead}\r\n\r\n")).await;
        assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
    }

    #[tokio::test]
    async fn post_delivery_violation_is_logged_then_blocked_next_time() {
        let origin = origin("<p>a graphic fight scene</p>", "text/html").await;
        let dir = TempDir::new().unwrap();
        let storage = SharedStorage::open(dir.path()).unwrap();
        let state = ProxyState::new(
            ProxyConfig::ephemeral(),
            storage.clone(),
            Some(violent_inference().await),
        )
        .unwrap();
        state.matcher.load(vec![violence_rule()]);
        let addr = start(state).await;
        let request = format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\n\r\n");

        let first = exchange(addr, &request).await;
        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));

        let mut logged = false;
        for _ in 0..100 {
            let events = storage.load_events().unwrap();
            if events.iter().any(|e| e.action == EventAction::Allowed) {
                logged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(logged, "post-delivery violation was never logged");

        let second = exchange(addr, &request).await;
        assert!(second.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    }

    #[tokio::test]
    async fn alert_rule_match_is_logged_as_allowed() {
        let origin = origin("ok", "text/plain").await;
        let rule = Rule::new(
            "Watch local traffic",
            ["127.0.0.1"],
            [RuleAction::Alert],
            Severity::Low,
        );
        let (state, _dir) = create_test_state(vec![rule]);
        let storage = state.storage.clone();
        let addr = start(state).await;

        let response = exchange(
            addr,
            &format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\n\r\n"),
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));

        let events = storage.load_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, EventAction::Allowed);
        assert_eq!(events[0].rule_description, "Watch local traffic");
    }
}
