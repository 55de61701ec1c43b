//! Rule-based request routing
//!
//! [`SliceRoute`] dispatches each request to the first slice whose [`RtRule`]
//! matches the request line and headers, falling back to a configurable slice
//! (404 by default). Rule evaluation is pure and synchronous.

use crate::content::Content;
use crate::error::{Result, VaultError};
use crate::slice::{BoxResponse, RequestLine, Slice, SliceHandle, StatusSlice};
use http::header::HeaderName;
use http::{HeaderMap, Method, StatusCode};
use regex::Regex;
use std::sync::Arc;
use tracing::trace;

/// Predicate over a request
#[derive(Debug, Clone)]
pub enum RtRule {
    /// Matches every request
    Fallback,
    /// Request method is one of the listed methods
    ByMethod(Vec<Method>),
    /// Some value of the named header fully matches the pattern
    ByHeader { name: HeaderName, pattern: Regex },
    /// Request path fully matches the pattern
    ByPath(Regex),
    /// Every inner rule matches
    All(Vec<RtRule>),
    /// At least one inner rule matches
    Any(Vec<RtRule>),
}

impl RtRule {
    pub fn by_method(methods: impl IntoIterator<Item = Method>) -> Self {
        RtRule::ByMethod(methods.into_iter().collect())
    }

    /// Header presence: any value of `name` matches
    pub fn by_header(name: &str) -> Result<Self> {
        Self::by_header_matching(name, ".*")
    }

    pub fn by_header_matching(name: &str, pattern: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| VaultError::ConfigError(format!("invalid header name `{}`: {}", name, e)))?;
        Ok(RtRule::ByHeader {
            name,
            pattern: full_match(pattern)?,
        })
    }

    pub fn by_path(pattern: &str) -> Result<Self> {
        Ok(RtRule::ByPath(full_match(pattern)?))
    }

    pub fn apply(&self, line: &RequestLine, headers: &HeaderMap) -> bool {
        match self {
            RtRule::Fallback => true,
            RtRule::ByMethod(methods) => methods.contains(line.method()),
            RtRule::ByHeader { name, pattern } => headers
                .get_all(name)
                .iter()
                .any(|value| pattern.is_match(&String::from_utf8_lossy(value.as_bytes()))),
            RtRule::ByPath(pattern) => pattern.is_match(line.path()),
            RtRule::All(rules) => rules.iter().all(|rule| rule.apply(line, headers)),
            RtRule::Any(rules) => rules.iter().any(|rule| rule.apply(line, headers)),
        }
    }
}

fn full_match(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| VaultError::ConfigError(format!("invalid pattern `{}`: {}", pattern, e)))
}

/// Ordered list of rule/slice pairs with a fallback slice
pub struct SliceRoute {
    routes: Vec<(RtRule, SliceHandle)>,
    fallback: SliceHandle,
}

impl SliceRoute {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: Arc::new(StatusSlice::new(StatusCode::NOT_FOUND)),
        }
    }

    pub fn route(mut self, rule: RtRule, slice: SliceHandle) -> Self {
        self.routes.push((rule, slice));
        self
    }

    pub fn fallback(mut self, slice: SliceHandle) -> Self {
        self.fallback = slice;
        self
    }
}

impl Default for SliceRoute {
    fn default() -> Self {
        Self::new()
    }
}

impl Slice for SliceRoute {
    fn response(&self, line: RequestLine, headers: HeaderMap, body: Content) -> BoxResponse {
        let target = self
            .routes
            .iter()
            .position(|(rule, _)| rule.apply(&line, &headers));
        trace!("Routing {} to {:?}", line, target);
        match target {
            Some(index) => self.routes[index].1.response(line, headers, body),
            None => self.fallback.response(line, headers, body),
        }
    }
}
