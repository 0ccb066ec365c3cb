//! Worker versions and the registration that promotes them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use url::Url;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Initial state, script being parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or unregistered).
    Redundant,
}

/// A service worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,
    pub script_url: Url,
    pub state: ServiceWorkerState,
    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Start installing a new worker, replacing any previous installing one.
    pub fn update(&mut self, script_url: Url) -> ServiceWorkerId {
        let mut worker = ServiceWorker::new(script_url);
        worker.set_state(ServiceWorkerState::Installing);
        let id = worker.id;
        if let Some(mut previous) = self.installing.replace(worker) {
            previous.set_state(ServiceWorkerState::Redundant);
        }
        id
    }

    /// Transition installing to waiting; a previously waiting worker becomes redundant.
    pub fn install_complete(&mut self) -> Option<&ServiceWorker> {
        let mut worker = self.installing.take()?;
        worker.set_state(ServiceWorkerState::Installed);
        if let Some(mut old) = self.waiting.replace(worker) {
            old.set_state(ServiceWorkerState::Redundant);
        }
        self.waiting.as_ref()
    }

    /// Discard the installing worker.
    pub fn install_failed(&mut self) -> Option<ServiceWorker> {
        let mut worker = self.installing.take()?;
        worker.set_state(ServiceWorkerState::Redundant);
        Some(worker)
    }

    /// Move the waiting worker to `Activating`; the old active worker becomes redundant.
    pub fn begin_activation(&mut self) -> Option<&ServiceWorker> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);
        if let Some(mut old) = self.active.replace(worker) {
            old.set_state(ServiceWorkerState::Redundant);
        }
        self.active.as_ref()
    }

    /// Finish activation.
    pub fn activation_complete(&mut self) -> Option<&ServiceWorker> {
        let worker = self.active.as_mut()?;
        if worker.state == ServiceWorkerState::Activating {
            worker.set_state(ServiceWorkerState::Activated);
        }
        self.active.as_ref()
    }

    /// Put an activating worker back into the waiting slot.
    pub fn activation_aborted(&mut self) -> Option<&ServiceWorker> {
        if self.active.as_ref()?.state != ServiceWorkerState::Activating {
            return None;
        }
        let mut worker = self.active.take()?;
        worker.set_state(ServiceWorkerState::Installed);
        self.waiting = Some(worker);
        self.waiting.as_ref()
    }

    /// Active worker, once fully activated.
    pub fn controller(&self) -> Option<&ServiceWorker> {
        self.active.as_ref().filter(|w| w.is_active())
    }

    /// State of the newest worker.
    pub fn newest_state(&self) -> Option<ServiceWorkerState> {
        self.installing
            .as_ref()
            .or(self.waiting.as_ref())
            .or(self.active.as_ref())
            .map(|w| w.state)
    }

    /// Unregister (mark every worker redundant). Returns whether anything was registered.
    pub fn unregister(&mut self) -> bool {
        let mut any = false;
        for slot in [&mut self.active, &mut self.waiting, &mut self.installing] {
            if let Some(mut worker) = slot.take() {
                worker.set_state(ServiceWorkerState::Redundant);
                any = true;
            }
        }
        any
    }
}
