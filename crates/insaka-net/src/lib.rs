//! # Insaka Net
//!
//! Request/response model, network fetching, and request filtering for the Insaka offline agent.
//!
//! ## Design Goals
//!
//! 1. **One network seam**: everything that touches the network goes through [`Fetcher`]
//! 2. **Single-use bodies**: a [`Response`] body is consumed by value; a second copy
//!    must be made explicitly with [`Response::clone_response`]
//! 3. **Response typing**: responses are classified `basic`/`cors`/`opaque` relative to the
//!    initiating origin so callers can decide what is safe to store

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use insaka_common::NetworkConfig;
use mime::Mime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace};
use url::{Origin, Url};

pub mod intercept;

pub use intercept::{InterceptAction, RequestFilter};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// What the requested resource will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDestination {
    /// Top-level navigation.
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    Worker,
    /// `fetch()`/XHR and anything else without a destination.
    #[default]
    Empty,
}

/// Request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// Network request seen by the agent.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub destination: RequestDestination,
    pub mode: RequestMode,
    /// Origin of the page that issued the request; the URL's own origin when unset.
    pub origin: Option<Origin>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            destination: RequestDestination::Empty,
            mode: RequestMode::Cors,
            origin: None,
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: RequestDestination::Document,
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the destination.
    pub fn destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the initiating origin.
    pub fn initiator(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Whether this is a top-level document load.
    pub fn is_navigation(&self) -> bool {
        self.destination == RequestDestination::Document
    }

    /// Key under which a response to this request is stored: the URL without its fragment.
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }

    /// Origin the response is judged against.
    pub fn initiator_origin(&self) -> Origin {
        self.origin.clone().unwrap_or_else(|| self.url.origin())
    }
}

/// Strip the fragment from a URL for cache matching.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// Response type, as exposed to page scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response with readable headers and body.
    Basic,
    /// Cross-origin response obtained with CORS.
    Cors,
    /// Constructed locally.
    #[default]
    Default,
    /// Network error.
    Error,
    /// Cross-origin `no-cors` response; status and body are hidden.
    Opaque,
    OpaqueRedirect,
}

/// HTTP response with a single-use body.
#[derive(Debug)]
pub struct Response {
    pub url: Url,
    /// Status code; `0` for opaque and error responses.
    pub status: u16,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub redirected: bool,
    body: Bytes,
}

impl Response {
    /// Create a locally constructed response.
    pub fn new(url: Url, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            response_type: ResponseType::Default,
            redirected: false,
            body: body.into(),
        }
    }

    /// Create a same-origin network response.
    pub fn basic(url: Url, status: u16, body: impl Into<Bytes>) -> Self {
        Self::new(url, status, body).with_type(ResponseType::Basic)
    }

    /// Create an opaque response for a cross-origin `no-cors` request.
    pub fn opaque(url: Url) -> Self {
        Self::new(url, 0, Bytes::new()).with_type(ResponseType::Opaque)
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Status in the 200-299 range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parsed `Content-Type`.
    pub fn content_type(&self) -> Option<Mime> {
        self.header("content-type").and_then(|s| s.parse().ok())
    }

    /// Body length in bytes, without consuming it.
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Duplicate the response so it can go to two consumers.
    pub fn clone_response(&self) -> Self {
        Self {
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            response_type: self.response_type,
            redirected: self.redirected,
            body: self.body.clone(),
        }
    }

    /// Consume the body.
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Consume the body as UTF-8 text.
    pub fn text(self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Consume the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Anything that can perform a network fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `request` from the network. Non-2xx statuses are responses, not errors.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Per-request timeout; unset means wait indefinitely.
    pub timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for LoaderConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            accept_language: config.accept_language.clone(),
            timeout: config.timeout_secs.map(Duration::from_secs),
            max_redirects: config.max_redirects,
        }
    }
}

/// reqwest-backed [`Fetcher`].
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "ResourceLoader initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn classify(request: &Request, final_url: &Url) -> ResponseType {
        if final_url.origin() == request.initiator_origin() {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Fetcher for ResourceLoader {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                self.config
                    .timeout
                    .map(NetError::Timeout)
                    .unwrap_or(NetError::HttpError(e))
            } else if e.is_connect() {
                NetError::Unreachable(e.to_string())
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let redirected = url != request.url;
        let response_type = Self::classify(request, &url);

        if response_type == ResponseType::Opaque {
            trace!(url = %url, "Opaque response, hiding status and body");
            let mut opaque = Response::opaque(url);
            opaque.redirected = redirected;
            return Ok(opaque);
        }

        let body = response.bytes().await?;

        trace!(
            url = %url,
            status,
            response_type = ?response_type,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url,
            status,
            headers,
            response_type,
            redirected,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_request_builder() {
        let request = Request::get(url("https://example.com/data"))
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            )
            .destination(RequestDestination::Script);

        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.destination, RequestDestination::Script);
        assert!(!request.is_navigation());
    }

    #[test]
    fn test_navigate_request() {
        let request = Request::navigate(url("https://example.com/"));
        assert!(request.is_navigation());
        assert_eq!(request.mode, RequestMode::Navigate);
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let request = Request::get(url("https://example.com/pages/a.py?x=1#section"));
        assert_eq!(request.cache_key(), "https://example.com/pages/a.py?x=1");
    }

    #[test]
    fn test_request_id_uniqueness() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_clone_response_duplicates_body() {
        let response = Response::basic(url("https://example.com/"), 200, "hello")
            .with_header(
                HeaderName::from_static("content-type"),
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
        let copy = response.clone_response();

        assert_eq!(copy.response_type, ResponseType::Basic);
        assert_eq!(copy.content_type().unwrap().subtype(), mime::HTML);
        assert_eq!(response.bytes(), copy.bytes());
    }

    #[test]
    fn test_opaque_response() {
        let response = Response::opaque(url("https://cdn.example.net/lib.js"));
        assert_eq!(response.status, 0);
        assert!(!response.ok());
        assert_eq!(response.body_len(), 0);
    }

    #[test]
    fn test_classify() {
        let page = url("https://example.com/").origin();
        let same = Request::get(url("https://example.com/a")).initiator(page.clone());
        assert_eq!(
            ResourceLoader::classify(&same, &same.url),
            ResponseType::Basic
        );

        let cross = Request::get(url("https://cdn.example.net/a")).initiator(page.clone());
        assert_eq!(ResourceLoader::classify(&cross, &cross.url), ResponseType::Cors);

        let no_cors = cross.clone().mode(RequestMode::NoCors);
        assert_eq!(
            ResourceLoader::classify(&no_cors, &no_cors.url),
            ResponseType::Opaque
        );
    }

    #[test]
    fn test_loader_config_from_network_config() {
        let network = NetworkConfig {
            timeout_secs: Some(3),
            ..Default::default()
        };
        let config = LoaderConfig::from(&network);
        assert_eq!(config.timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.max_redirects, 10);
        assert!(LoaderConfig::default().timeout.is_none());
    }
}
