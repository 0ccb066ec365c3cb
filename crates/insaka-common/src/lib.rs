//! # Insaka Common
//!
//! Configuration, error types, and logging setup shared by the Insaka offline agent crates.
//!
//! ## Features
//!
//! - `AgentConfig` with serde-backed JSON loading and defaults for the conference app
//! - Unified configuration/setup error type
//! - `tracing` subscriber setup

use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    ActionConfig, AgentConfig, CacheConfig, NetworkConfig, NotificationConfig, RoutingConfig,
    SyncConfig, CLOSE_ACTION, EXPLORE_ACTION,
};
pub use error::{InsakaError, InsakaResult};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
