//! Vigil Proxy - plaintext interception server and local API.
//!
//! Every inbound connection carries one request, which is parsed and routed:
//!
//! - targets under the API prefix go to the internal axum [`api`]
//! - `CONNECT` is acknowledged without opening a tunnel (or refused with
//!   a block page if the host is blocked)
//! - everything else is judged, then fetched from the origin
//!
//! ## Architecture
//!
//! ```text
//! Client → read head → route ─┬─ /api/*  → axum Router
//!                             ├─ CONNECT → evaluate → 200 established | 403
//!                             └─ forward → evaluate ─┬─ Drop  → 403 block page + event
//!                                                    └─ Allow → fetch origin → deliver
//!                                                                   │ (spawned)
//!                                                                   ▼
//!                                                  classify → event + warm category cache
//! ```
//!
//! Blocks only ever happen before delivery. Classification of delivered
//! content is log-only, but the categories it learns block later flows to
//! the same host. [`RuleWatcher`] reloads rules whenever the controller
//! saves new ones.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vigil_proxy::{InterceptionServer, ProxyConfig, ProxyState, RuleWatcher};
//! use vigil_storage::SharedStorage;
//!
//! #[tokio::main]
//! async fn main() -> vigil_proxy::Result<()> {
//!     let storage = SharedStorage::open_default()?;
//!     let state = ProxyState::new(ProxyConfig::default(), storage, None)?;
//!
//!     let watcher = Arc::new(RuleWatcher::for_state(&state));
//!     watcher.load_initial();
//!     tokio::spawn(watcher.start_polling());
//!
//!     InterceptionServer::bind(state)?.run().await
//! }
//! ```

pub mod api;
pub mod config;
mod error;
pub mod forward;
pub mod request;
mod rule_watcher;
mod server;
mod state;

pub use config::{ProxyConfig, DEFAULT_API_PREFIX, DEFAULT_HOST, DEFAULT_POLL_INTERVAL, DEFAULT_PORT};
pub use error::{ProxyError, Result};
pub use forward::{RawResponse, BLOCKED_HEADER};
pub use request::{RequestHead, Route};
pub use rule_watcher::RuleWatcher;
pub use server::InterceptionServer;
pub use state::ProxyState;
