//! Request filtering: decide which requests the agent handles and which pass straight through.

use crate::Request;
use http::Method;
use tracing::{debug, trace};

/// Decision for an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptAction {
    /// The agent handles the request.
    Handle,
    /// Leave the request and its response untouched.
    PassThrough,
}

/// Request filter: only listed methods are handled, and any URL containing a
/// bypass marker always passes through.
#[derive(Debug, Clone)]
pub struct RequestFilter {
    methods: Vec<Method>,
    bypass: Vec<String>,
}

impl RequestFilter {
    /// Create a filter that handles every GET request.
    pub fn new() -> Self {
        Self {
            methods: vec![Method::GET],
            bypass: Vec::new(),
        }
    }

    /// Filter used by the offline agent: GET only, every `bypass` substring passes through.
    pub fn for_agent<S: AsRef<str>>(bypass: &[S]) -> Self {
        let mut filter = Self::new();
        for marker in bypass {
            filter.bypass(marker.as_ref());
        }
        filter
    }

    /// Let URLs containing `marker` anywhere pass through.
    pub fn bypass(&mut self, marker: &str) {
        self.bypass.push(marker.to_string());
    }

    /// Decide what to do with a request. Matching runs on the full serialized URL.
    pub fn intercept(&self, request: &Request) -> InterceptAction {
        trace!(url = %request.url, method = %request.method, "Filtering request");

        if !self.methods.contains(&request.method) {
            debug!(url = %request.url, method = %request.method, "Method not handled, passing through");
            return InterceptAction::PassThrough;
        }

        let url = request.url.as_str();
        if let Some(marker) = self.bypass.iter().find(|m| url.contains(m.as_str())) {
            debug!(url = %request.url, marker = %marker, "Bypass marker matched");
            return InterceptAction::PassThrough;
        }

        InterceptAction::Handle
    }
}

impl Default for RequestFilter {
    fn default() -> Self {
        Self::new()
    }
}
