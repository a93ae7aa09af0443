//! Netcheck Core Library
//!
//! Connectivity, latency and throughput diagnostics with a persistent
//! history log. Used by the `netcheck` command line front end.

pub mod checker;
pub mod error;
pub mod history;
pub mod network_analyzer;
pub mod preferences;
pub mod presenter;
pub mod settings;
pub mod store;

// Re-export commonly used items
pub use checker::{LastSamples, NetworkChecker};
pub use error::{NetcheckError, Result};
pub use history::HistoryLog;
pub use preferences::Preferences;
pub use settings::{NetcheckSettings, load_settings, save_settings};
pub use store::{FileStore, KeyValueStore, MemoryStore};
