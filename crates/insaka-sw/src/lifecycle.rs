//! Install and activate handlers.

use std::sync::Arc;

use insaka_net::Request;
use tracing::{error, info};

use crate::cache::add_all;
use crate::events::{AgentEvent, EventKind, EventOutcome};
use crate::scope::AgentScope;
use crate::{ServiceWorkerEvent, SwError};

/// Prime the versioned cache with the precache manifest.
///
/// A failed precache is logged and leaves the cache empty; installation itself
/// still completes, and skip-waiting is only requested when every asset was stored.
pub async fn on_install(scope: Arc<AgentScope>, event: AgentEvent) -> Result<EventOutcome, SwError> {
    let AgentEvent::Install(_) = event else {
        return Err(SwError::UnexpectedEvent {
            expected: EventKind::Install,
            received: event.kind(),
        });
    };

    info!("🔧 Insaka PWA: Service Worker installing...");

    scope.caches.write().await.open(scope.cache_name.as_str())?;
    info!(cache = %scope.cache_name, "📦 Insaka PWA: Caching app shell");

    let requests = scope
        .config
        .cache
        .precache
        .iter()
        .map(|path| scope.resolve(path).map(Request::get))
        .collect::<Result<Vec<_>, _>>()?;

    match add_all(&scope.caches, &scope.cache_name, &requests, scope.fetcher.as_ref()).await {
        Ok(count) => {
            info!(count, "✅ Insaka PWA: Service Worker installed");
            scope.skip_waiting();
        }
        Err(e) => {
            error!(error = %e, "❌ Insaka PWA: Cache installation failed");
        }
    }

    Ok(EventOutcome::Done)
}

/// Delete every cache namespace but the current one, then claim open clients.
pub async fn on_activate(scope: Arc<AgentScope>, event: AgentEvent) -> Result<EventOutcome, SwError> {
    let AgentEvent::Activate(_) = event else {
        return Err(SwError::UnexpectedEvent {
            expected: EventKind::Activate,
            received: event.kind(),
        });
    };

    info!("🚀 Insaka PWA: Service Worker activating...");

    {
        let mut caches = scope.caches.write().await;
        for name in caches.keys() {
            if name == scope.cache_name.as_str() {
                continue;
            }
            info!(cache = %name, "🗑️ Insaka PWA: Deleting old cache");
            caches.delete(&name)?;
            scope.emit(ServiceWorkerEvent::CacheDeleted { name });
        }
    }

    let claimed = scope.claim_clients().await;
    info!(claimed, "Insaka PWA: Clients claimed");

    Ok(EventOutcome::Done)
}
