//! Push payloads and the notifications shown for them.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use insaka_common::{unix_millis, NotificationConfig};
use serde::{Deserialize, Serialize};

use crate::SwError;

/// Raw push message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushData(Bytes);

impl PushData {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// Payload as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// Payload parsed as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, SwError> {
        Ok(serde_json::from_slice(&self.0)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for PushData {
    fn from(text: &str) -> Self {
        Self(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<String> for PushData {
    fn from(text: String) -> Self {
        Self(Bytes::from(text))
    }
}

/// Action button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Data attached to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Arrival time, ms since epoch.
    pub date_of_arrival: u64,
    pub primary_key: u32,
}

/// Options passed to `showNotification`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
    pub tag: String,
}

impl NotificationOptions {
    /// Options for a push message; `data` of `None` falls back to the default body.
    pub fn for_push(config: &NotificationConfig, data: Option<&PushData>) -> Self {
        let body = data
            .map(PushData::text)
            .unwrap_or_else(|| config.default_body.clone());

        Self {
            body,
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: unix_millis(),
                primary_key: 1,
            },
            actions: config
                .actions
                .iter()
                .map(|a| NotificationAction {
                    action: a.action.clone(),
                    title: a.title.clone(),
                    icon: a.icon.clone(),
                })
                .collect(),
            tag: config.tag.clone(),
        }
    }
}

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A notification shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    #[serde(flatten)]
    pub options: NotificationOptions,
}

/// Notifications currently on screen.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    shown: Vec<Notification>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a notification. One already shown with the same tag is replaced and returned.
    pub fn show(
        &mut self,
        title: impl Into<String>,
        options: NotificationOptions,
    ) -> (Notification, Option<Notification>) {
        let replaced = if options.tag.is_empty() {
            None
        } else {
            self.shown
                .iter()
                .position(|n| n.options.tag == options.tag)
                .map(|i| self.shown.remove(i))
        };

        let notification = Notification {
            id: NotificationId::new(),
            title: title.into(),
            options,
        };
        self.shown.push(notification.clone());
        (notification, replaced)
    }

    /// Close a notification.
    pub fn close(&mut self, id: NotificationId) -> Option<Notification> {
        let index = self.shown.iter().position(|n| n.id == id)?;
        Some(self.shown.remove(index))
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.iter().find(|n| n.id == id)
    }

    /// Shown notifications, optionally filtered by tag.
    pub fn get_notifications(&self, tag: Option<&str>) -> Vec<&Notification> {
        self.shown
            .iter()
            .filter(|n| tag.map_or(true, |t| n.options.tag == t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_body_without_payload() {
        let options = NotificationOptions::for_push(&NotificationConfig::default(), None);

        assert_eq!(options.body, "New conference update available!");
        assert_eq!(options.icon, "/assets/logos/insaka.jpg");
        assert_eq!(options.badge, "/assets/logos/insaka.jpg");
        assert_eq!(options.vibrate, vec![200, 100, 200]);
        assert_eq!(options.tag, "insaka-notification");
        assert_eq!(options.data.primary_key, 1);
        assert!(options.data.date_of_arrival > 0);

        let actions: Vec<&str> = options.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec!["explore", "close"]);
        assert_eq!(options.actions[0].title, "View Details");
    }

    #[test]
    fn test_payload_text_becomes_body() {
        let data = PushData::from("Keynote moved to Hall B");
        let options = NotificationOptions::for_push(&NotificationConfig::default(), Some(&data));
        assert_eq!(options.body, "Keynote moved to Hall B");
    }

    #[test]
    fn test_push_data() {
        let data = PushData::new(Bytes::from_static(b"{\"session\":42}"));
        let value: serde_json::Value = data.json().unwrap();
        assert_eq!(value["session"], 42);

        let garbled = PushData::new(Bytes::from_static(&[0x68, 0x69, 0xff]));
        assert_eq!(garbled.text(), "hi\u{fffd}");
        assert!(garbled.json::<serde_json::Value>().is_err());
    }

    #[test]
    fn test_same_tag_replaces() {
        let config = NotificationConfig::default();
        let mut center = NotificationCenter::new();

        let (first, replaced) = center.show("Insaka Conference", NotificationOptions::for_push(&config, None));
        assert!(replaced.is_none());

        let (second, replaced) = center.show("Insaka Conference", NotificationOptions::for_push(&config, None));
        assert_eq!(replaced.unwrap().id, first.id);
        assert_eq!(center.len(), 1);
        assert!(center.get(second.id).is_some());
        assert_eq!(center.get_notifications(Some("insaka-notification")).len(), 1);
        assert!(center.get_notifications(Some("other")).is_empty());
    }

    #[test]
    fn test_close() {
        let mut center = NotificationCenter::new();
        let (shown, _) = center.show(
            "Insaka Conference",
            NotificationOptions::for_push(&NotificationConfig::default(), None),
        );

        assert_eq!(center.close(shown.id).unwrap().id, shown.id);
        assert!(center.close(shown.id).is_none());
        assert!(center.is_empty());
    }

    #[test]
    fn test_options_serialize_camel_case_data() {
        let options = NotificationOptions::for_push(&NotificationConfig::default(), None);
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["data"]["primaryKey"], 1);
        assert!(json["data"]["dateOfArrival"].is_u64());
    }
}
