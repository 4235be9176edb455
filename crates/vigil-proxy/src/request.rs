//! Request-head parsing and routing.
//!
//! Only the request line and headers are interpreted. Bodies are read by
//! `Content-Length`, or de-chunked when sent with `Transfer-Encoding:
//! chunked`, and passed on as a complete buffer.

use tokio::io::{AsyncRead, AsyncReadExt};
use vigil_core::clean_hostname;

use crate::error::{ProxyError, Result};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";
const MAX_CHUNK_LINE: usize = 1024;

/// Where a request goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Served by the internal API.
    Api,
    /// `CONNECT` handshake, acknowledged only.
    Connect,
    /// Proxied to the origin.
    Forward,
}

/// Parsed request line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method, as sent.
    pub method: String,
    /// Request target: origin-form, absolute-form or authority-form.
    pub target: String,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub version: String,
    /// Headers in arrival order.
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parses a head, without the terminating blank line.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ProxyError::BadRequest("request head is not UTF-8".to_string()))?;
        let mut lines = text.split("\r\n");

        let request_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| ProxyError::BadRequest("empty request line".to_string()))?;
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ProxyError::BadRequest(format!(
                "malformed request line: {request_line:?}"
            )));
        };
        if !version.starts_with("HTTP/") {
            return Err(ProxyError::BadRequest(format!(
                "unsupported protocol: {version:?}"
            )));
        }

        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProxyError::BadRequest(format!("malformed header: {line:?}")))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_ascii_uppercase(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// First header with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Declared body length; zero when absent.
    pub fn content_length(&self) -> Result<usize> {
        match self.header("content-length") {
            None => Ok(0),
            Some(value) => value
                .parse()
                .map_err(|_| ProxyError::BadRequest(format!("invalid Content-Length: {value:?}"))),
        }
    }

    /// Returns true if the body is sent chunked. Any other transfer coding
    /// is rejected.
    pub fn is_chunked(&self) -> Result<bool> {
        let Some(value) = self.header("transfer-encoding") else {
            return Ok(false);
        };
        let last = value.rsplit(',').next().map(str::trim).unwrap_or_default();
        if last.eq_ignore_ascii_case("chunked") {
            Ok(true)
        } else {
            Err(ProxyError::BadRequest(format!(
                "unsupported Transfer-Encoding: {value:?}"
            )))
        }
    }

    /// Returns true for `CONNECT`.
    pub fn is_connect(&self) -> bool {
        self.method == "CONNECT"
    }

    /// Returns true if the target is a full URL.
    pub fn is_absolute(&self) -> bool {
        self.target.starts_with("http://") || self.target.starts_with("https://")
    }

    /// Normalized hostname of the flow.
    pub fn hostname(&self) -> Option<String> {
        let raw = if self.is_connect() || self.is_absolute() {
            self.target.as_str()
        } else {
            self.header("host")?
        };
        Some(clean_hostname(raw)).filter(|h| !h.is_empty())
    }

    /// URL to fetch from the origin.
    pub fn origin_url(&self) -> Result<String> {
        if self.is_absolute() {
            return Ok(self.target.clone());
        }
        let host = self
            .header("host")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProxyError::BadRequest("missing Host header".to_string()))?;
        Ok(format!("http://{host}{}", self.target))
    }

    /// Picks the route for this request.
    pub fn route(&self, api_prefix: &str) -> Route {
        if self.is_connect() {
            Route::Connect
        } else if self.target.starts_with(api_prefix) {
            Route::Api
        } else {
            Route::Forward
        }
    }
}

/// Reads one request head and its complete body.
pub async fn read_request<R>(
    reader: &mut R,
    max_head_bytes: usize,
    max_body_bytes: usize,
) -> Result<(RequestHead, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find_terminator(&buf) {
            break pos;
        }
        if buf.len() > max_head_bytes {
            return Err(ProxyError::BadRequest("request head too large".to_string()));
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProxyError::BadRequest(
                "connection closed before request head".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = RequestHead::parse(&buf[..head_end])?;
    let rest = buf.split_off(head_end + HEAD_TERMINATOR.len());

    let body = if head.is_chunked()? {
        read_chunked_body(reader, rest, max_body_bytes).await?
    } else {
        read_sized_body(reader, rest, head.content_length()?, max_body_bytes).await?
    };

    Ok((head, body))
}

async fn read_sized_body<R>(
    reader: &mut R,
    mut body: Vec<u8>,
    length: usize,
    max_body_bytes: usize,
) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    if length > max_body_bytes {
        return Err(ProxyError::BadRequest(format!(
            "request body of {length} bytes exceeds limit"
        )));
    }
    fill_to(reader, &mut body, length).await?;
    body.truncate(length);
    Ok(body)
}

/// Decodes a chunked body. `raw` holds whatever followed the head.
async fn read_chunked_body<R>(
    reader: &mut R,
    mut raw: Vec<u8>,
    max_body_bytes: usize,
) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = read_line(reader, &mut raw, pos).await?;
        let line = std::str::from_utf8(&raw[pos..line_end])
            .map_err(|_| ProxyError::BadRequest("chunk size is not UTF-8".to_string()))?;
        let digits = line.split_once(';').map_or(line, |(size, _)| size).trim();
        let size = usize::from_str_radix(digits, 16)
            .map_err(|_| ProxyError::BadRequest(format!("invalid chunk size: {digits:?}")))?;
        pos = line_end + CRLF.len();

        if size == 0 {
            // Trailer fields are discarded up to the closing blank line.
            loop {
                let end = read_line(reader, &mut raw, pos).await?;
                let blank = end == pos;
                pos = end + CRLF.len();
                if blank {
                    return Ok(body);
                }
            }
        }

        if body.len() + size > max_body_bytes {
            return Err(ProxyError::BadRequest(format!(
                "request body of more than {max_body_bytes} bytes exceeds limit"
            )));
        }
        fill_to(reader, &mut raw, pos + size + CRLF.len()).await?;
        if &raw[pos + size..pos + size + CRLF.len()] != CRLF {
            return Err(ProxyError::BadRequest("chunk not terminated by CRLF".to_string()));
        }
        body.extend_from_slice(&raw[pos..pos + size]);
        pos += size + CRLF.len();
    }
}

/// Reads until `buf` holds at least `len` bytes.
async fn fill_to<R>(reader: &mut R, buf: &mut Vec<u8>, len: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    while buf.len() < len {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProxyError::BadRequest("request body truncated".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(())
}

/// Index of the CRLF ending the line that starts at `start`.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, start: usize) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(offset) = buf[start..].windows(CRLF.len()).position(|w| w == CRLF) {
            return Ok(start + offset);
        }
        if buf.len() - start > MAX_CHUNK_LINE {
            return Err(ProxyError::BadRequest("chunk line too long".to_string()));
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProxyError::BadRequest("request body truncated".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}
