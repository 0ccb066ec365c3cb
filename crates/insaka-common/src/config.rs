//! Agent configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{InsakaError, InsakaResult};

/// Top-level configuration for the offline cache agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Origin and path the agent controls; every configured path resolves against it
    pub scope: String,

    /// Cache namespace and precache manifest
    pub cache: CacheConfig,

    /// Which requests are left alone and where offline navigations land
    pub routing: RoutingConfig,

    /// Push notification presentation
    pub notifications: NotificationConfig,

    /// Background sync
    pub sync: SyncConfig,

    /// Network client settings
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Static part of the namespace; the process start time is appended
    pub prefix: String,

    /// Paths fetched and stored as one batch on install
    pub precache: Vec<String>,

    /// Directory holding persisted namespaces; in-memory only when unset
    pub storage_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// URL substrings that are never intercepted
    pub bypass: Vec<String>,

    /// Cached document served when a navigation fails offline
    pub fallback_document: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,

    /// Body used when a push arrives without a payload
    pub default_body: String,

    pub icon: String,

    pub badge: String,

    /// Vibration pattern in milliseconds
    pub vibrate: Vec<u32>,

    /// Notifications sharing a tag replace each other
    pub tag: String,

    pub actions: Vec<ActionConfig>,

    /// Opened by the "explore" action
    pub dashboard_path: String,

    /// Opened when the notification body is clicked
    pub root_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    pub action: String,
    pub title: String,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Tag that triggers the background sync routine
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub user_agent: String,

    pub accept_language: String,

    pub max_redirects: usize,

    /// Per-request timeout; requests may hang indefinitely when unset
    pub timeout_secs: Option<u64>,
}

pub const EXPLORE_ACTION: &str = "explore";
pub const CLOSE_ACTION: &str = "close";

const LOGO: &str = "/assets/logos/insaka.jpg";
const DASHBOARD: &str = "/pages/1_Delegate_Dashboard.py";
const LANDING: &str = "/pages/0_Landing.py";
const ICON_SIZES: [u32; 9] = [48, 72, 96, 144, 152, 167, 180, 192, 512];

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            scope: "http://localhost:8501/".to_string(),
            cache: CacheConfig::default(),
            routing: RoutingConfig::default(),
            notifications: NotificationConfig::default(),
            sync: SyncConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut precache = vec![
            "/".to_string(),
            DASHBOARD.to_string(),
            LANDING.to_string(),
            LOGO.to_string(),
        ];
        precache.extend(
            ICON_SIZES
                .iter()
                .map(|size| format!("/assets/pwa/icon-{size}x{size}.png")),
        );
        precache.push("/manifest.json".to_string());

        Self {
            prefix: "insaka-conference-v1.0.2-".to_string(),
            precache,
            storage_dir: None,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            bypass: vec![
                "/_stcore/".to_string(),
                "/static/".to_string(),
                "/health".to_string(),
            ],
            fallback_document: LANDING.to_string(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "Insaka Conference".to_string(),
            default_body: "New conference update available!".to_string(),
            icon: LOGO.to_string(),
            badge: LOGO.to_string(),
            vibrate: vec![200, 100, 200],
            tag: "insaka-notification".to_string(),
            actions: vec![
                ActionConfig {
                    action: EXPLORE_ACTION.to_string(),
                    title: "View Details".to_string(),
                    icon: Some(LOGO.to_string()),
                },
                ActionConfig {
                    action: CLOSE_ACTION.to_string(),
                    title: "Close".to_string(),
                    icon: Some(LOGO.to_string()),
                },
            ],
            dashboard_path: DASHBOARD.to_string(),
            root_path: "/".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tag: "background-sync".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("InsakaAgent/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            max_redirects: 10,
            timeout_secs: None,
        }
    }
}

impl AgentConfig {
    /// Default location: `<config dir>/insaka/sw.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("insaka").join("sw.json"))
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> InsakaResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to the defaults
    pub fn load_or_default(path: &Path) -> InsakaResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the configuration as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> InsakaResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Parsed scope URL
    pub fn scope_url(&self) -> InsakaResult<Url> {
        let url = Url::parse(&self.scope)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(InsakaError::config(format!(
                "scope must be http(s), got '{other}'"
            ))),
        }
    }

    /// Resolve a configured path against the scope
    pub fn resolve(&self, path: &str) -> InsakaResult<Url> {
        Ok(self.scope_url()?.join(path)?)
    }

    /// Check that the scope parses and every configured path resolves against it
    pub fn validate(&self) -> InsakaResult<()> {
        let scope = self.scope_url()?;

        if self.cache.prefix.is_empty() {
            return Err(InsakaError::config("cache prefix must not be empty"));
        }

        let paths = self
            .cache
            .precache
            .iter()
            .chain(std::iter::once(&self.routing.fallback_document))
            .chain(std::iter::once(&self.notifications.dashboard_path))
            .chain(std::iter::once(&self.notifications.root_path));
        for path in paths {
            scope.join(path)?;
        }

        if self.routing.bypass.iter().any(|marker| marker.is_empty()) {
            return Err(InsakaError::config("bypass markers must not be empty"));
        }

        Ok(())
    }
}
