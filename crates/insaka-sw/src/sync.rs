//! Background sync handler.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::events::{AgentEvent, EventKind, EventOutcome};
use crate::scope::AgentScope;
use crate::SwError;

/// Run background sync for the configured tag. Failures are logged, never returned.
pub async fn on_sync(scope: Arc<AgentScope>, event: AgentEvent) -> Result<EventOutcome, SwError> {
    let sync = match event {
        AgentEvent::Sync(sync) => sync,
        other => {
            return Err(SwError::UnexpectedEvent {
                expected: EventKind::Sync,
                received: other.kind(),
            })
        }
    };

    info!(tag = %sync.tag, "🔄 Insaka PWA: Background sync triggered");

    if sync.tag != scope.config.sync.tag {
        debug!(tag = %sync.tag, "Ignoring unknown sync tag");
        return Ok(EventOutcome::Done);
    }

    if let Err(e) = background_sync(&scope).await {
        error!(error = %e, last_chance = sync.last_chance, "❌ Insaka PWA: Background sync failed");
    }

    Ok(EventOutcome::Done)
}

/// Replay work queued while offline. Nothing is queued yet, so this only reports progress.
async fn background_sync(scope: &AgentScope) -> Result<(), SwError> {
    info!(cache = %scope.cache_name, "🔄 Insaka PWA: Handling background sync...");
    info!("✅ Insaka PWA: Background sync completed");
    Ok(())
}
