//! Per-chat conversation history.
//!
//! Each chat's recent turns are stored as one JSON array at
//! `<data_dir>/history/<sanitized-chat-id>.json`, capped to the configured
//! number of entries, with file locking for concurrent access.

pub mod error;
pub mod store;

pub use {
    error::{Error, Result},
    store::{HistoryEntry, HistoryLog, HistoryStore},
};
