//! Events delivered to handlers, and events reported back to the host.

use insaka_net::{Request, Response};
use serde::Serialize;
use url::Url;

use crate::notification::{Notification, NotificationId, PushData};
use crate::registration::{ServiceWorkerId, ServiceWorkerState};

/// Kind of event a handler is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    Sync,
    #[serde(rename = "notificationclick")]
    NotificationClick,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Install,
        EventKind::Activate,
        EventKind::Fetch,
        EventKind::Push,
        EventKind::Sync,
        EventKind::NotificationClick,
    ];
}

/// Install event.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallEvent;

/// Activate event.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivateEvent;

/// Fetch event.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    /// Client the request came from, if any.
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }
}

/// Push event.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<PushData>,
}

/// Background sync event.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub tag: String,
    /// Whether the host will not retry after this attempt.
    pub last_chance: bool,
}

/// Notification click event.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification: Notification,
    /// Action button chosen; `None` for a click on the body.
    pub action: Option<String>,
}

/// Event delivered to a handler.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Install(InstallEvent),
    Activate(ActivateEvent),
    Fetch(FetchEvent),
    Push(PushEvent),
    Sync(SyncEvent),
    NotificationClick(NotificationClickEvent),
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AgentEvent::Install(_) => EventKind::Install,
            AgentEvent::Activate(_) => EventKind::Activate,
            AgentEvent::Fetch(_) => EventKind::Fetch,
            AgentEvent::Push(_) => EventKind::Push,
            AgentEvent::Sync(_) => EventKind::Sync,
            AgentEvent::NotificationClick(_) => EventKind::NotificationClick,
        }
    }
}

/// What a handler did with its event.
#[derive(Debug)]
pub enum EventOutcome {
    /// Handled; nothing to hand back.
    Done,
    /// Not handled; the host should perform its default behavior.
    PassThrough,
    /// Response for a fetch event; `None` means no response is available.
    Respond(Option<Response>),
}

impl EventOutcome {
    pub fn is_pass_through(&self) -> bool {
        matches!(self, EventOutcome::PassThrough)
    }

    /// Take the response out of a `Respond` outcome.
    pub fn into_response(self) -> Option<Response> {
        match self {
            EventOutcome::Respond(response) => response,
            _ => None,
        }
    }
}

/// Side effects reported to the host.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceWorkerEvent {
    StateChange {
        worker_id: ServiceWorkerId,
        state: ServiceWorkerState,
    },
    SkipWaiting,
    ClientsClaimed {
        count: usize,
    },
    CacheDeleted {
        name: String,
    },
    NotificationShown {
        id: NotificationId,
        title: String,
        tag: String,
    },
    NotificationClosed {
        id: NotificationId,
    },
    WindowOpened {
        client_id: String,
        url: Url,
    },
    WindowFocused {
        client_id: String,
        url: Url,
    },
}
