//! Fetch handler: cache first, then network.

use std::sync::Arc;

use insaka_net::{InterceptAction, Request, Response, ResponseType};
use tracing::{debug, error, info};

use crate::events::{AgentEvent, EventKind, EventOutcome};
use crate::scope::AgentScope;
use crate::SwError;

/// Whether a network response may be written to the cache.
pub fn is_cacheable(response: &Response) -> bool {
    response.status == 200 && response.response_type == ResponseType::Basic
}

/// Serve from cache when possible, otherwise from the network, storing good
/// same-origin responses on the way back.
pub async fn on_fetch(scope: Arc<AgentScope>, event: AgentEvent) -> Result<EventOutcome, SwError> {
    let mut request = match event {
        AgentEvent::Fetch(fetch) => fetch.request,
        other => {
            return Err(SwError::UnexpectedEvent {
                expected: EventKind::Fetch,
                received: other.kind(),
            })
        }
    };

    if scope.filter.intercept(&request) == InterceptAction::PassThrough {
        debug!(url = %request.url, "Not intercepted");
        return Ok(EventOutcome::PassThrough);
    }

    let cached = scope.caches.read().await.match_request(&request);
    if let Some(hit) = cached {
        info!(url = %request.url, "📱 Insaka PWA: Serving from cache");
        return Ok(EventOutcome::Respond(Some(hit?)));
    }

    // Pages inside the scope issue every request, so they share its origin.
    if request.origin.is_none() {
        request.origin = Some(scope.scope_url.origin());
    }

    info!(url = %request.url, "🌐 Insaka PWA: Fetching from network");
    match scope.fetcher.fetch(&request).await {
        Ok(response) => {
            if !is_cacheable(&response) {
                return Ok(EventOutcome::Respond(Some(response)));
            }

            let copy = response.clone_response();
            let caches = scope.caches.clone();
            let name = scope.cache_name.clone();
            scope
                .wait_until(async move {
                    let mut storage = caches.write().await;
                    storage.put(name.as_str(), &request, copy)
                })
                .await;

            Ok(EventOutcome::Respond(Some(response)))
        }
        Err(e) => {
            error!(url = %request.url, error = %e, "❌ Insaka PWA: Network fetch failed");
            if !request.is_navigation() {
                return Ok(EventOutcome::Respond(None));
            }
            let fallback = scope.resolve(&scope.config.routing.fallback_document)?;
            let page = scope.caches.read().await.match_url(&fallback).transpose()?;
            Ok(EventOutcome::Respond(page))
        }
    }
}
