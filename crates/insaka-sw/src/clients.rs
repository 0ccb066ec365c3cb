//! Clients API: the pages the agent controls.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use insaka_common::unix_millis;
use serde::Serialize;
use url::Url;

use crate::SwError;

/// A client (controlled page).
#[derive(Debug, Clone, Serialize)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Whether the active worker controls this client.
    pub controlled: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Window,
    Worker,
}

impl Client {
    /// Create an uncontrolled window client.
    pub fn window(url: Url) -> Self {
        Self {
            id: client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controlled: false,
        }
    }

    /// Focus the client.
    pub fn focus(&mut self) -> Result<(), SwError> {
        if self.client_type != ClientType::Window {
            return Err(SwError::state("Can only focus window clients"));
        }
        self.focused = true;
        Ok(())
    }
}

/// Result of [`Clients::open_or_focus`].
#[derive(Debug, Clone)]
pub enum WindowTarget {
    Opened(Client),
    Focused(Client),
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Window clients, optionally only the controlled ones.
    pub fn match_all(&self, include_uncontrolled: bool) -> Vec<&Client> {
        let mut clients: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| c.client_type == ClientType::Window)
            .filter(|c| include_uncontrolled || c.controlled)
            .collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }

    /// Open a new focused window.
    pub fn open_window(&mut self, url: Url) -> Client {
        for other in self.clients.values_mut() {
            other.focused = false;
        }
        let mut client = Client::window(url);
        client.focused = true;
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Focus an existing window on `url`, or open one.
    pub fn open_or_focus(&mut self, url: Url) -> Result<WindowTarget, SwError> {
        let existing = self
            .clients
            .values()
            .find(|c| c.client_type == ClientType::Window && c.url == url)
            .map(|c| c.id.clone());

        match existing {
            Some(id) => {
                for other in self.clients.values_mut() {
                    other.focused = false;
                }
                let client = self
                    .clients
                    .get_mut(&id)
                    .ok_or_else(|| SwError::NotFound(id.clone()))?;
                client.focus()?;
                Ok(WindowTarget::Focused(client.clone()))
            }
            None => Ok(WindowTarget::Opened(self.open_window(url))),
        }
    }

    /// Take control of every client. Returns how many were newly claimed.
    pub fn claim(&mut self) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if !client.controlled {
                client.controlled = true;
                claimed += 1;
            }
        }
        claimed
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "client-{:012x}-{:04x}",
        unix_millis(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::url;

    #[test]
    fn test_open_window() {
        let mut clients = Clients::new();
        let client = clients.open_window(url("/"));

        assert_eq!(client.client_type, ClientType::Window);
        assert!(client.focused);
        assert!(!client.controlled);
        assert_eq!(clients.match_all(true)[0].id, client.id);
    }

    #[test]
    fn test_open_or_focus_reuses_window() {
        let mut clients = Clients::new();
        let dashboard = clients.open_window(url("/pages/1_Delegate_Dashboard.py"));
        clients.open_window(url("/"));

        match clients.open_or_focus(url("/pages/1_Delegate_Dashboard.py")).unwrap() {
            WindowTarget::Focused(client) => {
                assert_eq!(client.id, dashboard.id);
                assert!(client.focused);
            }
            WindowTarget::Opened(_) => panic!("expected existing window to be focused"),
        }
        assert_eq!(clients.len(), 2);
        assert_eq!(clients.match_all(true).iter().filter(|c| c.focused).count(), 1);

        assert!(matches!(
            clients.open_or_focus(url("/pages/0_Landing.py")).unwrap(),
            WindowTarget::Opened(_)
        ));
        assert_eq!(clients.len(), 3);
    }

    #[test]
    fn test_claim() {
        let mut clients = Clients::new();
        clients.add(Client::window(url("/")));
        clients.add(Client::window(url("/pages/0_Landing.py")));

        assert!(clients.match_all(false).is_empty());
        assert_eq!(clients.claim(), 2);
        assert_eq!(clients.match_all(false).len(), 2);
        assert_eq!(clients.claim(), 0);
    }

    #[test]
    fn test_focus_worker_client_fails() {
        let mut client = Client::window(url("/"));
        client.client_type = ClientType::Worker;
        assert!(client.focus().is_err());
    }
}
