//! Global scope shared by every handler.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use insaka_common::{AgentConfig, InsakaError};
use insaka_net::{Fetcher, RequestFilter};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheName, CacheStorage};
use crate::clients::{Client, Clients, WindowTarget};
use crate::events::ServiceWorkerEvent;
use crate::notification::{Notification, NotificationCenter, NotificationId, NotificationOptions};
use crate::SwError;

/// Everything a handler can reach: caches, clients, notifications and the network.
pub struct AgentScope {
    pub config: AgentConfig,
    pub scope_url: Url,
    /// Namespace this agent version writes to.
    pub cache_name: CacheName,
    pub caches: Arc<RwLock<CacheStorage>>,
    pub clients: RwLock<Clients>,
    pub notifications: RwLock<NotificationCenter>,
    pub fetcher: Arc<dyn Fetcher>,
    pub filter: RequestFilter,
    skip_waiting: AtomicBool,
    pending: Mutex<JoinSet<Result<(), SwError>>>,
    events: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl std::fmt::Debug for AgentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentScope")
            .field("scope_url", &self.scope_url.as_str())
            .field("cache_name", &self.cache_name)
            .finish_non_exhaustive()
    }
}

impl AgentScope {
    pub(crate) fn new(
        config: AgentConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: CacheStorage,
        events: mpsc::UnboundedSender<ServiceWorkerEvent>,
    ) -> Result<Self, SwError> {
        config.validate()?;
        let scope_url = config.scope_url()?;
        let cache_name = CacheName::versioned(&config.cache.prefix);
        let filter = RequestFilter::for_agent(&config.routing.bypass);

        Ok(Self {
            config,
            scope_url,
            cache_name,
            caches: Arc::new(RwLock::new(storage)),
            clients: RwLock::new(Clients::new()),
            notifications: RwLock::new(NotificationCenter::new()),
            fetcher,
            filter,
            skip_waiting: AtomicBool::new(false),
            pending: Mutex::new(JoinSet::new()),
            events,
        })
    }

    /// Resolve a path against the scope.
    pub fn resolve(&self, path: &str) -> Result<Url, SwError> {
        Ok(self.scope_url.join(path).map_err(InsakaError::from)?)
    }

    /// Report a side effect to the host.
    pub fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.events.send(event);
    }

    /// Ask to be activated as soon as installation completes.
    pub fn skip_waiting(&self) {
        if !self.skip_waiting.swap(true, Ordering::SeqCst) {
            self.emit(ServiceWorkerEvent::SkipWaiting);
        }
    }

    /// Consume a pending skip-waiting request.
    pub(crate) fn take_skip_waiting(&self) -> bool {
        self.skip_waiting.swap(false, Ordering::SeqCst)
    }

    /// Keep the agent alive until `work` finishes, without blocking the caller.
    pub async fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = Result<(), SwError>> + Send + 'static,
    {
        let mut pending = self.pending.lock().await;
        while let Some(result) = pending.try_join_next() {
            log_deferred(result);
        }
        pending.spawn(work);
    }

    /// Deferred tasks not yet reaped.
    #[cfg(test)]
    pub(crate) async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Wait for every piece of deferred work, including work queued while waiting.
    pub async fn settle(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.pending.lock().await);
            if batch.is_empty() {
                return;
            }
            debug!(tasks = batch.len(), "Settling deferred work");
            while let Some(result) = batch.join_next().await {
                log_deferred(result);
            }
        }
    }

    /// Open a new window on `path`.
    pub async fn open_window(&self, path: &str) -> Result<Client, SwError> {
        let url = self.resolve(path)?;
        let client = self.clients.write().await.open_window(url);
        self.emit(ServiceWorkerEvent::WindowOpened {
            client_id: client.id.clone(),
            url: client.url.clone(),
        });
        Ok(client)
    }

    /// Focus a window already showing `path`, or open one.
    pub async fn open_or_focus(&self, path: &str) -> Result<Client, SwError> {
        let url = self.resolve(path)?;
        let target = self.clients.write().await.open_or_focus(url)?;
        let client = match target {
            WindowTarget::Opened(client) => {
                self.emit(ServiceWorkerEvent::WindowOpened {
                    client_id: client.id.clone(),
                    url: client.url.clone(),
                });
                client
            }
            WindowTarget::Focused(client) => {
                self.emit(ServiceWorkerEvent::WindowFocused {
                    client_id: client.id.clone(),
                    url: client.url.clone(),
                });
                client
            }
        };
        Ok(client)
    }

    /// Take control of every open client.
    pub async fn claim_clients(&self) -> usize {
        let count = self.clients.write().await.claim();
        self.emit(ServiceWorkerEvent::ClientsClaimed { count });
        count
    }

    /// Show a notification, replacing any with the same tag.
    pub async fn show_notification(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Notification {
        let (shown, replaced) = self.notifications.write().await.show(title, options);
        if let Some(old) = replaced {
            self.emit(ServiceWorkerEvent::NotificationClosed { id: old.id });
        }
        self.emit(ServiceWorkerEvent::NotificationShown {
            id: shown.id,
            title: shown.title.clone(),
            tag: shown.options.tag.clone(),
        });
        shown
    }

    /// Close a notification.
    pub async fn close_notification(&self, id: NotificationId) -> Option<Notification> {
        let closed = self.notifications.write().await.close(id)?;
        self.emit(ServiceWorkerEvent::NotificationClosed { id });
        Some(closed)
    }
}

fn log_deferred(result: Result<Result<(), SwError>, JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Deferred work failed"),
        Err(e) => warn!(error = %e, "Deferred work panicked or was cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{drain, ScriptedFetcher};
    use insaka_common::NotificationConfig;
    use std::sync::atomic::AtomicUsize;

    fn scope() -> (AgentScope, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scope = AgentScope::new(
            AgentConfig::default(),
            Arc::new(ScriptedFetcher::new()),
            CacheStorage::new(),
            tx,
        )
        .unwrap();
        (scope, rx)
    }

    #[test]
    fn test_cache_name_uses_prefix() {
        let (scope, _rx) = scope();
        assert!(scope
            .cache_name
            .as_str()
            .starts_with("insaka-conference-v1.0.2-"));
        assert_eq!(
            scope.resolve("/pages/0_Landing.py").unwrap().as_str(),
            "http://localhost:8501/pages/0_Landing.py"
        );
    }

    #[test]
    fn test_invalid_scope_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = AgentConfig {
            scope: "ftp://localhost/".into(),
            ..Default::default()
        };
        let result = AgentScope::new(config, Arc::new(ScriptedFetcher::new()), CacheStorage::new(), tx);
        assert!(matches!(result, Err(SwError::Config(_))));
    }

    #[test]
    fn test_skip_waiting_once() {
        let (scope, mut rx) = scope();
        scope.skip_waiting();
        scope.skip_waiting();

        assert_eq!(drain(&mut rx).len(), 1);
        assert!(scope.take_skip_waiting());
        assert!(!scope.take_skip_waiting());
    }

    #[tokio::test]
    async fn test_settle_waits_for_deferred_work() {
        let (scope, _rx) = scope();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let done = done.clone();
            scope
                .wait_until(async move {
                    tokio::task::yield_now().await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;
        }
        scope
            .wait_until(async { Err(SwError::cache("write failed")) })
            .await;

        scope.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        scope.settle().await;
    }

    #[tokio::test]
    async fn test_finished_work_is_reaped() {
        let (scope, _rx) = scope();

        for _ in 0..10 {
            let (tx, rx) = tokio::sync::oneshot::channel();
            scope
                .wait_until(async move {
                    let _ = tx.send(());
                    Ok(())
                })
                .await;
            rx.await.unwrap();
            tokio::task::yield_now().await;
        }

        assert!(scope.pending_len().await <= 1);
        scope.settle().await;
        assert_eq!(scope.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_window_events() {
        let (scope, mut rx) = scope();

        let opened = scope.open_or_focus("/pages/1_Delegate_Dashboard.py").await.unwrap();
        let focused = scope.open_or_focus("/pages/1_Delegate_Dashboard.py").await.unwrap();
        assert_eq!(opened.id, focused.id);

        let events = drain(&mut rx);
        assert!(matches!(events[0], ServiceWorkerEvent::WindowOpened { .. }));
        assert!(matches!(events[1], ServiceWorkerEvent::WindowFocused { .. }));

        scope.open_window("/").await.unwrap();
        assert_eq!(scope.claim_clients().await, 2);
    }

    #[tokio::test]
    async fn test_notification_events() {
        let (scope, mut rx) = scope();
        let options = NotificationOptions::for_push(&NotificationConfig::default(), None);

        let first = scope.show_notification("Insaka Conference", options.clone()).await;
        scope.show_notification("Insaka Conference", options).await;
        assert!(scope.close_notification(first.id).await.is_none());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[1],
            ServiceWorkerEvent::NotificationClosed { id } if id == first.id
        ));
    }
}
