//! Push and notification-click handlers.

use std::sync::Arc;

use insaka_common::{CLOSE_ACTION, EXPLORE_ACTION};
use tracing::{debug, info};

use crate::events::{AgentEvent, EventKind, EventOutcome};
use crate::notification::NotificationOptions;
use crate::scope::AgentScope;
use crate::SwError;

/// Show a notification for an incoming push message.
pub async fn on_push(scope: Arc<AgentScope>, event: AgentEvent) -> Result<EventOutcome, SwError> {
    let data = match event {
        AgentEvent::Push(push) => push.data,
        other => {
            return Err(SwError::UnexpectedEvent {
                expected: EventKind::Push,
                received: other.kind(),
            })
        }
    };

    info!(has_payload = data.is_some(), "📲 Insaka PWA: Push notification received");

    let config = &scope.config.notifications;
    let options = NotificationOptions::for_push(config, data.as_ref());
    let shown = scope.show_notification(&config.title, options).await;
    debug!(id = shown.id.raw(), tag = %shown.options.tag, "Notification shown");

    Ok(EventOutcome::Done)
}

/// Close the clicked notification and route to the page matching the chosen action.
pub async fn on_notification_click(
    scope: Arc<AgentScope>,
    event: AgentEvent,
) -> Result<EventOutcome, SwError> {
    let click = match event {
        AgentEvent::NotificationClick(click) => click,
        other => {
            return Err(SwError::UnexpectedEvent {
                expected: EventKind::NotificationClick,
                received: other.kind(),
            })
        }
    };

    info!(action = ?click.action, "👆 Insaka PWA: Notification clicked");

    scope.close_notification(click.notification.id).await;

    let config = &scope.config.notifications;
    match click.action.as_deref() {
        Some(EXPLORE_ACTION) => {
            scope.open_or_focus(&config.dashboard_path).await?;
        }
        Some(CLOSE_ACTION) => {}
        _ => {
            scope.open_window(&config.root_path).await?;
        }
    }

    Ok(EventOutcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NotificationClickEvent, PushEvent};
    use crate::notification::{Notification, PushData};
    use crate::testing::{agent_with, drain, ScriptedFetcher};
    use crate::ServiceWorkerEvent;
    use insaka_common::AgentConfig;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup() -> (Arc<AgentScope>, UnboundedReceiver<ServiceWorkerEvent>) {
        let (agent, rx) = agent_with(AgentConfig::default(), Arc::new(ScriptedFetcher::new()));
        (agent.scope(), rx)
    }

    async fn pushed(scope: &Arc<AgentScope>) -> Notification {
        on_push(scope.clone(), AgentEvent::Push(PushEvent::default()))
            .await
            .unwrap();
        scope.notifications.read().await.get_notifications(None)[0].clone()
    }

    fn click(notification: Notification, action: Option<&str>) -> AgentEvent {
        AgentEvent::NotificationClick(NotificationClickEvent {
            notification,
            action: action.map(str::to_string),
        })
    }

    fn opened_paths(events: &[ServiceWorkerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                ServiceWorkerEvent::WindowOpened { url, .. }
                | ServiceWorkerEvent::WindowFocused { url, .. } => Some(url.path().to_string()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_push_without_payload() {
        let (scope, mut rx) = setup();
        let shown = pushed(&scope).await;

        assert_eq!(shown.title, "Insaka Conference");
        assert_eq!(shown.options.body, "New conference update available!");
        assert!(matches!(
            drain(&mut rx)[..],
            [ServiceWorkerEvent::NotificationShown { .. }]
        ));
    }

    #[tokio::test]
    async fn test_push_with_payload() {
        let (scope, _rx) = setup();
        let event = AgentEvent::Push(PushEvent {
            data: Some(PushData::from("Lunch is served")),
        });
        on_push(scope.clone(), event).await.unwrap();

        let center = scope.notifications.read().await;
        assert_eq!(center.get_notifications(None)[0].options.body, "Lunch is served");
    }

    #[tokio::test]
    async fn test_explore_opens_dashboard() {
        let (scope, mut rx) = setup();
        let shown = pushed(&scope).await;
        drain(&mut rx);

        on_notification_click(scope.clone(), click(shown, Some("explore")))
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert!(matches!(events[0], ServiceWorkerEvent::NotificationClosed { .. }));
        assert_eq!(opened_paths(&events), vec!["/pages/1_Delegate_Dashboard.py"]);
        assert!(scope.notifications.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_action_opens_nothing() {
        let (scope, mut rx) = setup();
        let shown = pushed(&scope).await;
        drain(&mut rx);

        on_notification_click(scope.clone(), click(shown, Some("close")))
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(opened_paths(&events).is_empty());
        assert!(scope.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_body_click_opens_root() {
        let (scope, mut rx) = setup();
        let shown = pushed(&scope).await;
        drain(&mut rx);

        on_notification_click(scope.clone(), click(shown.clone(), None))
            .await
            .unwrap();
        assert_eq!(opened_paths(&drain(&mut rx)), vec!["/"]);

        // Unknown actions behave like a body click.
        on_notification_click(scope.clone(), click(shown, Some("snooze")))
            .await
            .unwrap();
        assert_eq!(opened_paths(&drain(&mut rx)), vec!["/"]);
        assert_eq!(scope.clients.read().await.len(), 2);
    }
}
