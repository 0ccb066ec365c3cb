//! # Insaka Service Worker
//!
//! Offline cache agent for the Insaka conference PWA.
//!
//! ## Features
//!
//! - **Lifecycle**: install primes a versioned cache, activate evicts every older namespace
//! - **Fetch interception**: cache-first with network fallback and an offline landing page
//! - **Push**: notification display and click routing
//! - **Background sync**: registered extension point
//!
//! ## Architecture
//!
//! ```text
//! CacheAgent
//!     ├── HandlerTable  (EventKind → handler)
//!     │       ├── install / activate     lifecycle.rs
//!     │       ├── fetch                  fetch.rs
//!     │       ├── push / notificationclick  push.rs
//!     │       └── sync                   sync.rs
//!     ├── ServiceWorkerRegistration (installing / waiting / active)
//!     └── AgentScope (shared with every handler)
//!             ├── CacheStorage ── Cache ── Request → CacheEntry
//!             ├── Clients
//!             ├── NotificationCenter
//!             ├── RequestFilter
//!             └── Fetcher (network)
//! ```
//!
//! Host-visible side effects (state changes, opened windows, shown notifications)
//! are reported on the [`ServiceWorkerEvent`] channel returned by [`CacheAgent::new`].

use insaka_common::InsakaError;
use insaka_net::NetError;
use thiserror::Error;

pub mod agent;
pub mod cache;
pub mod clients;
pub mod events;
pub mod fetch;
pub mod lifecycle;
pub mod notification;
pub mod push;
pub mod registration;
pub mod scope;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{CacheAgent, Handler, HandlerFuture, HandlerTable};
pub use cache::{add_all, Cache, CacheEntry, CacheName, CacheStorage};
pub use clients::{Client, ClientType, Clients, WindowTarget};
pub use events::{
    ActivateEvent, AgentEvent, EventKind, EventOutcome, FetchEvent, InstallEvent,
    NotificationClickEvent, PushEvent, ServiceWorkerEvent, SyncEvent,
};
pub use notification::{
    Notification, NotificationAction, NotificationCenter, NotificationData, NotificationId,
    NotificationOptions, PushData,
};
pub use registration::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
pub use scope::AgentScope;

// ==================== Errors ====================

/// Errors that can occur in agent operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Configuration error: {0}")]
    Config(#[from] InsakaError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Handler for {expected:?} received a {received:?} event")]
    UnexpectedEvent {
        expected: EventKind,
        received: EventKind,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SwError {
    pub(crate) fn cache(message: impl Into<String>) -> Self {
        Self::CacheError(message.into())
    }

    pub(crate) fn state(message: impl Into<String>) -> Self {
        Self::StateError(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SwError::UnexpectedEvent {
            expected: EventKind::Install,
            received: EventKind::Fetch,
        };
        assert_eq!(err.to_string(), "Handler for Install received a Fetch event");

        let err: SwError = NetError::Unreachable("offline".into()).into();
        assert!(matches!(err, SwError::Network(_)));
        assert_eq!(err.to_string(), "Network error: Network unreachable: offline");
    }
}
