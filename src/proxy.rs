//! Proxy repository slice

use crate::auth::{AuthUser, Authentication};
use crate::content::Content;
use crate::error::Result;
use crate::events::{EventQueue, ProxyArtifactEvent};
use crate::key::Key;
use crate::proxy_cache::{Cache, Remote};
use crate::slice::{AsyncResponse, BasicResponse, BoxResponse, RequestLine, Slice};
use async_trait::async_trait;
use http::header::{CONTENT_LENGTH, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::sync::Arc;
use tracing::debug;

/// Serves artifacts from a cache, fetching misses from one origin
///
/// Only `GET` and `HEAD` are served. A request the authentication rejects gets
/// 401; an artifact the origin does not have gets 404. Other origin failures
/// are returned as errors for the server to render.
pub struct ProxySlice {
    repo_name: String,
    remote: Arc<dyn Remote>,
    cache: Arc<dyn Cache>,
    auth: Arc<dyn Authentication>,
    events: Option<EventQueue<ProxyArtifactEvent>>,
}

impl ProxySlice {
    pub fn new(
        repo_name: impl Into<String>,
        remote: Arc<dyn Remote>,
        cache: Arc<dyn Cache>,
        auth: Arc<dyn Authentication>,
    ) -> Self {
        Self {
            repo_name: repo_name.into(),
            remote,
            cache,
            auth,
            events: None,
        }
    }

    /// Report every artifact fetched from the origin to `queue`
    pub fn with_events(mut self, queue: EventQueue<ProxyArtifactEvent>) -> Self {
        self.events = Some(queue);
        self
    }
}

/// Remote wrapper reporting successful origin downloads
struct ReportingRemote<'a> {
    inner: &'a dyn Remote,
    events: Option<&'a EventQueue<ProxyArtifactEvent>>,
    repo_name: &'a str,
    owner: &'a str,
}

#[async_trait]
impl Remote for ReportingRemote<'_> {
    async fn fetch(&self, key: &Key) -> Result<Content> {
        let content = self.inner.fetch(key).await?;
        if let Some(events) = self.events {
            events.enqueue(ProxyArtifactEvent {
                key: key.clone(),
                repo_name: self.repo_name.to_string(),
                owner: self.owner.to_string(),
            });
        }
        Ok(content)
    }
}

impl Slice for ProxySlice {
    fn response(&self, line: RequestLine, headers: HeaderMap, _body: Content) -> BoxResponse {
        let head = match *line.method() {
            Method::GET => false,
            Method::HEAD => true,
            _ => return BasicResponse::new(StatusCode::METHOD_NOT_ALLOWED).boxed(),
        };
        let user: AuthUser = match self.auth.authenticate(&line, &headers) {
            Some(user) => user,
            None => {
                return BasicResponse::new(StatusCode::UNAUTHORIZED)
                    .header(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"pkgvault\""))
                    .boxed()
            }
        };
        let key = Key::new(line.path());
        if key.is_root() {
            return BasicResponse::not_found().boxed();
        }

        let repo_name = self.repo_name.clone();
        let remote = self.remote.clone();
        let cache = self.cache.clone();
        let events = self.events.clone();
        AsyncResponse::new(async move {
            let reporting = ReportingRemote {
                inner: remote.as_ref(),
                events: events.as_ref(),
                repo_name: &repo_name,
                owner: user.name(),
            };
            match cache.load(&key, &reporting).await {
                Ok(content) => {
                    let mut response = BasicResponse::ok();
                    if let Some(size) = content.size() {
                        response = response.header(CONTENT_LENGTH, HeaderValue::from(size));
                    }
                    if head {
                        Ok(response.boxed())
                    } else {
                        Ok(response.body(content).boxed())
                    }
                }
                Err(e) if e.is_not_found() => {
                    debug!("{}: {} not found upstream", repo_name, key);
                    Ok(BasicResponse::not_found().boxed())
                }
                Err(e) => Err(e),
            }
        })
        .boxed()
    }
}
