//! Cache API: versioned namespaces of stored responses.

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::future::try_join_all;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use insaka_common::unix_millis;
use insaka_net::{cache_key, Fetcher, Request, Response, ResponseType};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use url::Url;

use crate::SwError;

// ==================== Cache Name ====================

/// Identifier of a cache namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheName(String);

impl CacheName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `prefix` followed by the current Unix time in milliseconds.
    pub fn versioned(prefix: &str) -> Self {
        Self(format!("{prefix}{}", unix_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ==================== Cache Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL without fragment.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response URL.
    pub response_url: String,

    /// Response status.
    pub status: u16,

    /// Response type at the time it was stored.
    pub response_type: ResponseType,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Build an entry, consuming the response body.
    pub fn from_response(request: &Request, response: Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: request.cache_key(),
            method: request.method.to_string(),
            response_url: response.url.to_string(),
            status: response.status,
            response_type: response.response_type,
            headers,
            body: response.bytes().to_vec(),
            cached_at: unix_millis(),
        }
    }

    /// Materialise a fresh response from the stored copy.
    pub fn to_response(&self) -> Result<Response, SwError> {
        let url = Url::parse(&self.response_url)
            .or_else(|_| Url::parse(&self.url))
            .map_err(|e| SwError::cache(format!("corrupt entry {}: {e}", self.url)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        let mut response = Response::new(url, self.status, Bytes::from(self.body.clone()))
            .with_type(self.response_type);
        response.headers = headers;
        Ok(response)
    }
}

// ==================== Cache ====================

/// A cache instance.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries keyed by URL.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        if request.method != Method::GET {
            return None;
        }
        self.entries.get(&request.cache_key())
    }

    /// Match a URL.
    pub fn match_url(&self, url: &Url) -> Option<&CacheEntry> {
        self.entries.get(&cache_key(url))
    }

    /// Add entry.
    fn put_entry(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    /// Get all keys (URLs), sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Cache storage (`caches` global), optionally mirrored to a directory.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,

    /// Names in creation order; storage-wide matching searches oldest first.
    order: Vec<String>,

    /// Directory holding one JSON file per cache.
    storage_dir: Option<PathBuf>,
}

impl CacheStorage {
    /// Create in-memory cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open storage backed by `dir`, loading every cache persisted there.
    pub fn persistent(dir: impl Into<PathBuf>) -> Result<Self, SwError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut loaded = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read(&path).map(|raw| serde_json::from_slice::<Cache>(&raw)) {
                Ok(Ok(cache)) => loaded.push(cache),
                Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache file"),
            }
        }
        // Versioned names end in a timestamp, so name order approximates creation order.
        loaded.sort_by(|a, b| a.name.cmp(&b.name));

        let mut storage = Self {
            storage_dir: Some(dir),
            ..Self::default()
        };
        for cache in loaded {
            debug!(cache = %cache.name, entries = cache.len(), "Loaded persisted cache");
            storage.order.push(cache.name.clone());
            storage.caches.insert(cache.name.clone(), cache);
        }
        Ok(storage)
    }

    /// Directory backing this storage, if any.
    pub fn storage_dir(&self) -> Option<&Path> {
        self.storage_dir.as_deref()
    }

    /// Open a cache (creates if it doesn't exist).
    pub fn open(&mut self, name: &str) -> Result<&Cache, SwError> {
        if !self.caches.contains_key(name) {
            trace!(cache = name, "Creating cache");
            self.caches.insert(name.to_string(), Cache::new(name));
            self.order.push(name.to_string());
            self.persist(name)?;
        }
        self.get(name)
            .ok_or_else(|| SwError::cache(format!("cache {name} vanished")))
    }

    /// Look up an existing cache.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> Result<bool, SwError> {
        if self.caches.remove(name).is_none() {
            return Ok(false);
        }
        self.order.retain(|n| n != name);
        if let Some(path) = self.file_for(name) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Delete every cache, returning how many were removed.
    pub fn clear(&mut self) -> Result<usize, SwError> {
        let names = self.keys();
        for name in &names {
            self.delete(name)?;
        }
        Ok(names.len())
    }

    /// Get all cache names in creation order.
    pub fn keys(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Match a request across all caches, oldest first.
    pub fn match_request(&self, request: &Request) -> Option<Result<Response, SwError>> {
        self.order
            .iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_request(request))
            .map(CacheEntry::to_response)
    }

    /// Match a URL across all caches, oldest first.
    pub fn match_url(&self, url: &Url) -> Option<Result<Response, SwError>> {
        self.order
            .iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_url(url))
            .map(CacheEntry::to_response)
    }

    /// Store `response` under `request` in cache `name`, creating the cache if needed.
    pub fn put(&mut self, name: &str, request: &Request, response: Response) -> Result<(), SwError> {
        if request.method != Method::GET {
            return Err(SwError::cache(format!(
                "cannot store {} request for {}",
                request.method, request.url
            )));
        }
        self.put_entries(name, vec![CacheEntry::from_response(request, response)])
    }

    /// Store a batch of entries in one step. Memory is only updated once the batch is on disk.
    pub fn put_entries(&mut self, name: &str, entries: Vec<CacheEntry>) -> Result<(), SwError> {
        let mut updated = self.open(name)?.clone();
        for entry in entries {
            updated.put_entry(entry);
        }
        self.write_file(&updated)?;
        self.caches.insert(name.to_string(), updated);
        Ok(())
    }

    fn file_for(&self, name: &str) -> Option<PathBuf> {
        let file: String = name
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
                _ => '_',
            })
            .collect();
        self.storage_dir
            .as_ref()
            .map(|dir| dir.join(format!("{file}.json")))
    }

    fn persist(&self, name: &str) -> Result<(), SwError> {
        match self.caches.get(name) {
            Some(cache) => self.write_file(cache),
            None => Ok(()),
        }
    }

    fn write_file(&self, cache: &Cache) -> Result<(), SwError> {
        let Some(path) = self.file_for(&cache.name) else {
            return Ok(());
        };
        let raw = serde_json::to_vec(cache)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// ==================== addAll ====================

/// Fetch every request and store the responses in cache `name` as one batch.
///
/// Nothing is written unless every fetch succeeds with a 2xx status.
pub async fn add_all(
    caches: &RwLock<CacheStorage>,
    name: &CacheName,
    requests: &[Request],
    fetcher: &dyn Fetcher,
) -> Result<usize, SwError> {
    let fetches = requests.iter().map(|request| async move {
        if request.method != Method::GET {
            return Err(SwError::cache(format!(
                "cannot store {} request for {}",
                request.method, request.url
            )));
        }
        let response = fetcher.fetch(request).await?;
        if !response.ok() {
            return Err(SwError::cache(format!(
                "{} returned status {}",
                request.url, response.status
            )));
        }
        Ok(CacheEntry::from_response(request, response))
    });

    let entries = try_join_all(fetches).await?;
    let count = entries.len();

    caches.write().await.put_entries(name.as_str(), entries)?;
    debug!(cache = %name, count, "Stored batch");
    Ok(count)
}
