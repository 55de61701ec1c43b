//! Deadline for producing a response

use crate::content::Content;
use crate::error::{Result, VaultError};
use crate::slice::{BoxResponse, Connection, RequestLine, Response, Slice, SliceHandle};
use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use std::time::Duration;
use tracing::warn;

/// Message sent with the 503 answer to timed-out requests
pub const TIMEOUT_MESSAGE: &str = "Request cancelled by timeout";

/// Slice answering 503 when the wrapped slice takes longer than the deadline
///
/// The deadline covers producing the response up to the moment the status line
/// is handed to the connection. Once the origin has started responding, a
/// timeout can no longer change the status and surfaces as an error instead.
pub struct TimeoutSlice {
    origin: SliceHandle,
    timeout: Duration,
}

impl TimeoutSlice {
    pub fn new(origin: SliceHandle, timeout: Duration) -> Self {
        Self { origin, timeout }
    }
}

impl Slice for TimeoutSlice {
    fn response(&self, line: RequestLine, headers: HeaderMap, body: Content) -> BoxResponse {
        let target = line.to_string();
        Box::new(TimeoutResponse {
            origin: self.origin.response(line, headers, body),
            timeout: self.timeout,
            target,
        })
    }
}

struct TimeoutResponse {
    origin: BoxResponse,
    timeout: Duration,
    target: String,
}

/// Connection remembering whether the status was already written
struct TrackedConnection<'a> {
    inner: &'a mut dyn Connection,
    accepted: bool,
}

#[async_trait]
impl Connection for TrackedConnection<'_> {
    async fn accept(&mut self, status: StatusCode, headers: HeaderMap, body: Content) -> Result<()> {
        self.accepted = true;
        self.inner.accept(status, headers, body).await
    }
}

#[async_trait]
impl Response for TimeoutResponse {
    async fn send(self: Box<Self>, connection: &mut dyn Connection) -> Result<()> {
        let this = *self;
        let mut tracked = TrackedConnection {
            inner: connection,
            accepted: false,
        };
        let outcome = tokio::time::timeout(this.timeout, this.origin.send(&mut tracked)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!("{} timed out after {:?}", this.target, this.timeout);
                if tracked.accepted {
                    return Err(VaultError::Timeout(format!("{} after {:?}", this.target, this.timeout)));
                }
                let mut headers = HeaderMap::new();
                headers.insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("text/plain; charset=utf-8"),
                );
                tracked
                    .inner
                    .accept(StatusCode::SERVICE_UNAVAILABLE, headers, Content::from(TIMEOUT_MESSAGE))
                    .await
            }
        }
    }
}
