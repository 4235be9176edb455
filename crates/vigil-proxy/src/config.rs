//! Interception server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default listener port.
pub const DEFAULT_PORT: u16 = 8766;

/// Default listener host (localhost only).
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Requests whose target starts with this prefix are served internally.
pub const DEFAULT_API_PREFIX: &str = "/api/";

/// Default interval between rule-change polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to listen on.
    pub addr: SocketAddr,
    /// Target prefix of the internal API.
    pub api_prefix: String,
    /// Largest accepted request head.
    pub max_head_bytes: usize,
    /// Largest accepted request or origin response body.
    pub max_body_bytes: usize,
    /// How much of a response body is sent for classification.
    pub classify_limit_bytes: usize,
    /// Rule-change poll interval.
    pub poll_interval: Duration,
    /// Deadline for a client to finish sending its request.
    pub read_timeout: Duration,
    /// `sourceApp` recorded on events from proxied flows.
    pub source_app: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(DEFAULT_HOST, DEFAULT_PORT),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            max_head_bytes: 16 * 1024,
            max_body_bytes: 10 * 1024 * 1024,
            classify_limit_bytes: 8 * 1024,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_timeout: Duration::from_secs(30),
            source_app: "proxy".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Sets the port, keeping the host.
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }


    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }




    /// Config for tests: ephemeral port on localhost, fast polling.
    pub fn ephemeral() -> Self {
        Self::default()
            .with_port(0)
            .with_poll_interval(Duration::from_millis(20))
    }
}
