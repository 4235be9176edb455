//! Vigil - local content filtering driven by plain-language family rules.
//!
//! This crate holds the pieces of the `vigil` binary that are worth testing
//! on their own:
//!
//! - [`config`]: flag and environment validation
//! - [`commands`]: controller commands for rules, events and ad-hoc analysis

pub mod commands;
pub mod config;

pub use config::AppConfig;
