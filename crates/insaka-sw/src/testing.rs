//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use insaka_common::AgentConfig;
use insaka_net::{Fetcher, NetError, Request, Response, ResponseType};
use tokio::sync::mpsc;
use url::{Origin, Url};

use crate::{CacheAgent, CacheStorage, HandlerTable, ServiceWorkerEvent};

pub const BASE: &str = "http://localhost:8501/";

/// Resolve `path` against the default scope.
pub fn url(path: &str) -> Url {
    Url::parse(BASE).unwrap().join(path).unwrap()
}

#[derive(Debug, Clone)]
struct Route {
    status: u16,
    response_type: ResponseType,
    body: Bytes,
}

/// Fetcher answering from a fixed route table. Unknown paths get a basic 404.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    routes: HashMap<String, Route>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
    origins: Mutex<Vec<Option<Origin>>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, path: &str, status: u16, body: &'static str) -> Self {
        self.route_typed(path, status, ResponseType::Basic, body)
    }

    pub fn route_typed(
        mut self,
        path: &str,
        status: u16,
        response_type: ResponseType,
        body: &'static str,
    ) -> Self {
        self.routes.insert(
            url(path).to_string(),
            Route {
                status,
                response_type,
                body: Bytes::from_static(body.as_bytes()),
            },
        );
        self
    }

    /// Every subsequent fetch fails as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// URLs fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Initiating origin of each fetch, in order.
    pub fn origins(&self) -> Vec<Option<Origin>> {
        self.origins.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.lock().unwrap().push(request.url.to_string());
        self.origins.lock().unwrap().push(request.origin.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Unreachable(request.url.to_string()));
        }
        let response = match self.routes.get(request.url.as_str()) {
            Some(route) => Response::new(request.url.clone(), route.status, route.body.clone())
                .with_type(route.response_type),
            None => Response::basic(request.url.clone(), 404, "not found"),
        };
        Ok(response)
    }
}

/// Fetcher serving every asset of the default precache manifest.
pub fn manifest_fetcher() -> ScriptedFetcher {
    AgentConfig::default()
        .cache
        .precache
        .iter()
        .fold(ScriptedFetcher::new(), |fetcher, path| {
            fetcher.route(path, 200, "asset")
        })
}

/// Agent with the standard handlers and in-memory storage.
pub fn agent_with(
    config: AgentConfig,
    fetcher: Arc<ScriptedFetcher>,
) -> (CacheAgent, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
    CacheAgent::with_parts(config, fetcher, CacheStorage::new(), HandlerTable::standard()).unwrap()
}

/// Drain every event emitted so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServiceWorkerEvent>) -> Vec<ServiceWorkerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
