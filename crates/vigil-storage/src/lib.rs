//! Vigil Storage - file-based shared state between processes.
//!
//! The controller writes rules; the enforcement process writes events.
//! This crate handles:
//!
//! - Rule persistence (`rules.json`, written atomically)
//! - A monotonic change timestamp readers poll to detect new rules
//! - An append-only pipe-delimited event log with single-backup rotation
//!
//! # Example
//!
//! ```no_run
//! use vigil_core::{EventAction, FilterEvent, Rule, RuleAction, Severity};
//! use vigil_storage::SharedStorage;
//!
//! let storage = SharedStorage::open_default().unwrap();
//!
//! // Controller side
//! let rule = Rule::new("No gambling", ["gambling"], [RuleAction::Block], Severity::High);
//! storage.save_rules(&[rule]).unwrap();
//!
//! // Enforcement side
//! let rules = storage.load_rules().unwrap();
//! storage
//!     .append_event(&FilterEvent::blocked("casino.example", "proxy", &rules[0]))
//!     .unwrap();
//! ```

pub mod error;
pub mod event_line;
mod shared;

pub use error::{Result, StorageError};
pub use shared::{
    SharedStorage, DEFAULT_ROTATE_BYTES, EVENTS_BACKUP_FILE, EVENTS_FILE, RULES_FILE,
    TIMESTAMP_FILE,
};
