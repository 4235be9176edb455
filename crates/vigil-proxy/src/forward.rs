//! Origin forwarding, block pages and post-delivery classification.

use tracing::{debug, info, warn};
use vigil_core::categorizer::rules_for_categories;
use vigil_core::{EventAction, FilterEvent, Rule};

use crate::error::{ProxyError, Result};
use crate::request::RequestHead;
use crate::state::ProxyState;

/// Header set on every block response.
pub const BLOCKED_HEADER: &str = "X-Vigil-Blocked";

/// Reply to an acknowledged `CONNECT`.
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// Block page HTML template.
const BLOCK_PAGE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Blocked by Vigil</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: #2d3748;
            color: white;
        }
        .container {
            text-align: center;
            padding: 2rem;
            max-width: 500px;
        }
        h1 {
            margin: 0 0 1rem 0;
            font-size: 2rem;
        }
        .reason {
            background: rgba(255,255,255,0.15);
            padding: 1rem;
            border-radius: 8px;
            margin-top: 1rem;
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>Site Blocked</h1>
        <p>This site was blocked by a family rule.</p>
        <div class="reason">
            <p><strong>Rule:</strong> {{RULE}}</p>
            <p><strong>Site:</strong> {{HOST}}</p>
        </div>
    </div>
</body>
</html>"#;

/// Headers that describe one connection and are not forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-authenticate",
    "host",
    "content-length",
];

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// A complete HTTP/1.1 response, written with `Connection: close`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Headers, excluding `Content-Length` and `Connection`.
    pub headers: Vec<(String, String)>,
    /// Body.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Creates an empty response.
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// A plain-text response.
    pub fn text(status: u16, reason: &str, message: &str) -> Self {
        Self::new(status, reason)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(format!("{message}\n").into_bytes())
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// First header with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serializes status line, headers and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// The 403 block page for `host`, naming `rule`.
pub fn block_response(rule: &Rule, host: &str) -> RawResponse {
    let html = BLOCK_PAGE_HTML
        .replace("{{RULE}}", &escape_html(&rule.description_text))
        .replace("{{HOST}}", &escape_html(host));

    RawResponse::new(403, "Forbidden")
        .with_header("Content-Type", "text/html; charset=utf-8")
        .with_header(BLOCKED_HEADER, "true")
        .with_body(html.into_bytes())
}

/// Fetches the request from its origin.
pub async fn fetch_origin(state: &ProxyState, head: &RequestHead, body: Vec<u8>) -> Result<RawResponse> {
    let url = head.origin_url()?;
    let method = reqwest::Method::from_bytes(head.method.as_bytes())
        .map_err(|_| ProxyError::BadRequest(format!("invalid method {:?}", head.method)))?;

    let mut request = state.http.request(method, &url);
    for (name, value) in head.headers.iter().filter(|(n, _)| !is_hop_by_hop(n)) {
        request = request.header(name.as_str(), value.as_str());
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let response = request.send().await?;
    let status = response.status();

    let headers: Vec<(String, String)> = response
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

    let bytes = response.bytes().await?;
    if bytes.len() > state.config.max_body_bytes {
        return Err(ProxyError::Upstream(format!(
            "origin response of {} bytes exceeds limit",
            bytes.len()
        )));
    }

    debug!(url = %url, status = status.as_u16(), bytes = bytes.len(), "Fetched from origin");

    Ok(RawResponse {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("").to_string(),
        headers,
        body: bytes.to_vec(),
    })
}

/// Returns true for content types worth classifying.
pub fn is_textual(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    let content_type = content_type.to_ascii_lowercase();
    content_type.starts_with("text/") || content_type.contains("json") || content_type.contains("xml")
}

/// Readable text from the start of a body: markup removed, whitespace
/// collapsed, at most `limit` bytes considered.
pub fn sample_text(body: &[u8], limit: usize) -> Option<String> {
    let slice = &body[..body.len().min(limit)];
    let raw = String::from_utf8_lossy(slice);

    let mut text = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if in_tag => {}
            c => text.push(c),
        }
    }

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(collapsed).filter(|t| !t.is_empty())
}

/// Classifies delivered content. Log-only: a violation records an
/// `allowed` event and remembers the host's categories so later flows are
/// blocked before delivery.
pub async fn classify_after_delivery(state: ProxyState, host: String, text: String) {
    let Some(client) = &state.inference else {
        return;
    };
    let rules = state.active_rules();
    if rules.is_empty() {
        return;
    }

    match client.analyze_content(&text, &rules).await {
        Ok(result) if result.violation => {
            let violated = rules_for_categories(&result.categories, &rules);
            let description = violated
                .first()
                .map(|r| r.description_text.clone())
                .unwrap_or_else(|| result.explanation.clone());

            if let Some(categorizer) = &state.categorizer {
                categorizer.remember(&host, &result.categories);
            }
            state
                .record(FilterEvent::new(
                    EventAction::Allowed,
                    host.as_str(),
                    state.config.source_app.as_str(),
                    description,
                ))
                .await;
            info!(
                hostname = %host,
                action = %result.recommended_action,
                "Delivered content violated rules"
            );
        }
        Ok(_) => debug!(hostname = %host, "Delivered content is clean"),
        Err(e) => warn!(hostname = %host, error = %e, "Post-delivery classification failed"),
    }
}
