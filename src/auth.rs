//! Request authentication

use crate::slice::RequestLine;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::AUTHORIZATION;
use http::HeaderMap;
use std::collections::HashMap;

/// Identity attached to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    name: String,
}

impl AuthUser {
    pub const ANONYMOUS: &'static str = "anonymous";

    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn anonymous() -> Self {
        Self::new(Self::ANONYMOUS)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_anonymous(&self) -> bool {
        self.name == Self::ANONYMOUS
    }
}

/// Resolves the identity of a request; `None` rejects it
pub trait Authentication: Send + Sync {
    fn authenticate(&self, line: &RequestLine, headers: &HeaderMap) -> Option<AuthUser>;
}

/// Lets everybody in as the anonymous user
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

impl Authentication for Anonymous {
    fn authenticate(&self, _line: &RequestLine, _headers: &HeaderMap) -> Option<AuthUser> {
        Some(AuthUser::anonymous())
    }
}

/// HTTP Basic authentication against a fixed user table
#[derive(Debug, Default, Clone)]
pub struct BasicAuthentication {
    users: HashMap<String, String>,
}

impl BasicAuthentication {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    fn credentials(headers: &HeaderMap) -> Option<(String, String)> {
        let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, encoded) = header.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        Some((user.to_string(), password.to_string()))
    }
}

impl Authentication for BasicAuthentication {
    fn authenticate(&self, _line: &RequestLine, headers: &HeaderMap) -> Option<AuthUser> {
        let (user, password) = Self::credentials(headers)?;
        match self.users.get(&user) {
            Some(expected) if *expected == password => Some(AuthUser::new(user)),
            _ => None,
        }
    }
}

/// Value of an `Authorization` header for Basic credentials
pub fn basic_header(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}
