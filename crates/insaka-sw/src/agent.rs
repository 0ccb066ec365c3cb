//! The cache agent: handler table, registration and event dispatch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use hashbrown::HashMap;
use insaka_common::AgentConfig;
use insaka_net::{Fetcher, LoaderConfig, Request, ResourceLoader};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, trace};
use url::Url;

use crate::cache::{CacheName, CacheStorage};
use crate::clients::Client;
use crate::events::{
    ActivateEvent, AgentEvent, EventKind, EventOutcome, FetchEvent, InstallEvent,
    NotificationClickEvent, PushEvent, ServiceWorkerEvent, SyncEvent,
};
use crate::notification::{NotificationId, PushData};
use crate::registration::{ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
use crate::scope::AgentScope;
use crate::{fetch, lifecycle, push, sync, SwError};

/// Future returned by a handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<EventOutcome, SwError>> + Send>>;

/// Event handler.
pub type Handler = Arc<dyn Fn(Arc<AgentScope>, AgentEvent) -> HandlerFuture + Send + Sync>;

/// Mapping from event kind to handler, fixed once the agent is built.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<EventKind, Handler>,
}

impl HandlerTable {
    /// Empty table; every event passes through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the install, activate, fetch, push, notification-click and sync handlers.
    pub fn standard() -> Self {
        Self::new()
            .on(EventKind::Install, lifecycle::on_install)
            .on(EventKind::Activate, lifecycle::on_activate)
            .on(EventKind::Fetch, fetch::on_fetch)
            .on(EventKind::Push, push::on_push)
            .on(EventKind::NotificationClick, push::on_notification_click)
            .on(EventKind::Sync, sync::on_sync)
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn on<F, Fut>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(Arc<AgentScope>, AgentEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<EventOutcome, SwError>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |scope: Arc<AgentScope>, event: AgentEvent| -> HandlerFuture {
                Box::pin(handler(scope, event))
            });
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: EventKind) -> Option<&Handler> {
        self.handlers.get(&kind)
    }

    pub fn remove(&mut self, kind: EventKind) -> Option<Handler> {
        self.handlers.remove(&kind)
    }

    /// Registered kinds, in dispatch-table order.
    pub fn kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Offline cache agent.
///
/// Owns one registration for its scope and routes every host event through the
/// [`HandlerTable`]. Side effects are reported on the channel returned by the constructor.
#[derive(Debug)]
pub struct CacheAgent {
    scope: Arc<AgentScope>,
    handlers: HandlerTable,
    registration: RwLock<ServiceWorkerRegistration>,
    script_url: Url,
}

impl CacheAgent {
    /// Agent with the standard handlers, fetching through `fetcher`.
    ///
    /// Caches are persisted when `config.cache.storage_dir` is set.
    pub fn new(
        config: AgentConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), SwError> {
        let storage = match &config.cache.storage_dir {
            Some(dir) => CacheStorage::persistent(dir)?,
            None => CacheStorage::new(),
        };
        Self::with_parts(config, fetcher, storage, HandlerTable::standard())
    }

    /// Agent with the standard handlers and a network loader built from `config.network`.
    pub fn with_network(
        config: AgentConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), SwError> {
        let loader = ResourceLoader::new(LoaderConfig::from(&config.network))?;
        Self::new(config, Arc::new(loader))
    }

    /// Agent assembled from explicit parts.
    pub fn with_parts(
        config: AgentConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: CacheStorage,
        handlers: HandlerTable,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), SwError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let scope = AgentScope::new(config, fetcher, storage, event_tx)?;
        let script_url = scope.resolve("/sw.js")?;
        let registration = ServiceWorkerRegistration::new(scope.scope_url.clone());

        info!(
            scope = %scope.scope_url,
            cache = %scope.cache_name,
            handlers = ?handlers.kinds(),
            "CacheAgent created"
        );

        Ok((
            Self {
                scope: Arc::new(scope),
                handlers,
                registration: RwLock::new(registration),
                script_url,
            },
            event_rx,
        ))
    }

    /// Shared scope handed to every handler.
    pub fn scope(&self) -> Arc<AgentScope> {
        self.scope.clone()
    }

    /// Namespace this agent version writes to.
    pub fn cache_name(&self) -> &CacheName {
        &self.scope.cache_name
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// State of the newest worker, if any is registered.
    pub async fn state(&self) -> Option<ServiceWorkerState> {
        self.registration.read().await.newest_state()
    }

    /// ID of the worker currently controlling pages.
    pub async fn controller(&self) -> Option<ServiceWorkerId> {
        self.registration.read().await.controller().map(|w| w.id)
    }

    /// Run the handler registered for the event's kind.
    pub async fn dispatch(&self, event: AgentEvent) -> Result<EventOutcome, SwError> {
        let kind = event.kind();
        let Some(handler) = self.handlers.get(kind) else {
            debug!(?kind, "No handler registered, passing through");
            return Ok(EventOutcome::PassThrough);
        };
        trace!(?kind, "Dispatching event");
        handler(self.scope.clone(), event).await
    }

    /// Install a new worker version.
    ///
    /// The new version activates straight away when the install handler asked to
    /// skip waiting or when nothing is active yet; otherwise it waits.
    pub async fn install(&self) -> Result<ServiceWorkerId, SwError> {
        let id = self.registration.write().await.update(self.script_url.clone());
        self.state_changed(id, ServiceWorkerState::Installing);

        if let Err(e) = self.dispatch(AgentEvent::Install(InstallEvent)).await {
            error!(error = %e, "Install handler failed");
            self.registration.write().await.install_failed();
            self.state_changed(id, ServiceWorkerState::Redundant);
            return Err(e);
        }

        let nothing_active = {
            let mut registration = self.registration.write().await;
            registration.install_complete();
            registration.active.is_none()
        };
        self.state_changed(id, ServiceWorkerState::Installed);

        if self.scope.take_skip_waiting() || nothing_active {
            self.activate().await?;
        }
        Ok(id)
    }

    /// Activate the waiting worker.
    ///
    /// A failing activate handler puts the worker back into the waiting slot and
    /// returns the error; clients are not claimed.
    pub async fn activate(&self) -> Result<(), SwError> {
        let (id, previous) = {
            let mut registration = self.registration.write().await;
            let previous = registration.active.as_ref().map(|w| w.id);
            let id = registration
                .begin_activation()
                .map(|w| w.id)
                .ok_or_else(|| SwError::state("no waiting worker to activate"))?;
            (id, previous)
        };
        if let Some(old) = previous {
            self.state_changed(old, ServiceWorkerState::Redundant);
        }
        self.state_changed(id, ServiceWorkerState::Activating);

        match self.dispatch(AgentEvent::Activate(ActivateEvent)).await {
            Ok(_) => {
                self.registration.write().await.activation_complete();
                self.state_changed(id, ServiceWorkerState::Activated);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Activation aborted");
                self.registration.write().await.activation_aborted();
                self.state_changed(id, ServiceWorkerState::Installed);
                Err(e)
            }
        }
    }

    /// Handle a page request. Without an active worker every request passes through.
    pub async fn fetch(&self, request: Request) -> Result<EventOutcome, SwError> {
        if self.controller().await.is_none() {
            trace!(url = %request.url, "No controller, passing through");
            return Ok(EventOutcome::PassThrough);
        }
        self.dispatch(AgentEvent::Fetch(FetchEvent::new(request))).await
    }

    /// Deliver a push message.
    pub async fn push(&self, data: Option<PushData>) -> Result<EventOutcome, SwError> {
        self.dispatch(AgentEvent::Push(PushEvent { data })).await
    }

    /// Click a shown notification, optionally on one of its action buttons.
    pub async fn click_notification(
        &self,
        id: NotificationId,
        action: Option<&str>,
    ) -> Result<EventOutcome, SwError> {
        let notification = self
            .scope
            .notifications
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SwError::NotFound(format!("notification {}", id.raw())))?;

        self.dispatch(AgentEvent::NotificationClick(NotificationClickEvent {
            notification,
            action: action.map(str::to_string),
        }))
        .await
    }

    /// Fire a background sync event.
    pub async fn sync(&self, tag: &str) -> Result<EventOutcome, SwError> {
        self.dispatch(AgentEvent::Sync(SyncEvent {
            tag: tag.to_string(),
            last_chance: false,
        }))
        .await
    }

    /// Register a page at `path`, controlled if a worker is active.
    pub async fn attach_client(&self, path: &str) -> Result<Client, SwError> {
        let mut client = Client::window(self.scope.resolve(path)?);
        client.controlled = self.controller().await.is_some();
        self.scope.clients.write().await.add(client.clone());
        Ok(client)
    }

    /// Wait for deferred work such as background cache writes.
    pub async fn settle(&self) {
        self.scope.settle().await;
    }

    /// Drop every worker version. Returns whether anything was registered.
    pub async fn unregister(&self) -> bool {
        let ids: Vec<ServiceWorkerId> = {
            let mut registration = self.registration.write().await;
            let ids: Vec<ServiceWorkerId> = [
                &registration.installing,
                &registration.waiting,
                &registration.active,
            ]
                .into_iter()
                .flatten()
                .map(|w| w.id)
                .collect();
            registration.unregister();
            ids
        };
        for id in &ids {
            self.state_changed(*id, ServiceWorkerState::Redundant);
        }
        info!(workers = ids.len(), "Unregistered");
        !ids.is_empty()
    }

    /// Delete every cache namespace. Returns how many were removed.
    pub async fn clear_caches(&self) -> Result<usize, SwError> {
        let names = self.scope.caches.read().await.keys();
        let removed = self.scope.caches.write().await.clear()?;
        for name in names {
            self.scope.emit(ServiceWorkerEvent::CacheDeleted { name });
        }
        Ok(removed)
    }

    fn state_changed(&self, worker_id: ServiceWorkerId, state: ServiceWorkerState) {
        debug!(?worker_id, ?state, "Worker state changed");
        self.scope
            .emit(ServiceWorkerEvent::StateChange { worker_id, state });
    }
}
