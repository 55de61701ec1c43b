//! Request handling abstraction
//!
//! A [`Slice`] turns a request (request line, headers, body) into a deferred
//! [`Response`]. Nothing happens until the response is sent to a [`Connection`],
//! which receives the status, headers and body exactly once. Repositories,
//! routers, groups and decorators are all slices, and compose by wrapping each
//! other.

use crate::content::Content;
use crate::error::{Result, VaultError};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

/// Method, target and protocol version of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: Method,
    uri: Uri,
    version: Version,
}

impl RequestLine {
    pub fn new(method: Method, uri: Uri, version: Version) -> Self {
        Self { method, uri, version }
    }

    /// HTTP/1.1 request for `target`
    pub fn from_parts(method: Method, target: &str) -> Result<Self> {
        let uri = target
            .parse::<Uri>()
            .map_err(|e| VaultError::HttpError(format!("invalid request target `{}`: {}", target, e)))?;
        Ok(Self::new(method, uri, Version::HTTP_11))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Same request addressed to another path, keeping the query string
    pub fn with_path(&self, path: &str) -> Result<Self> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        let target = match self.uri.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        };
        let uri = target
            .parse::<Uri>()
            .map_err(|e| VaultError::HttpError(format!("invalid request target `{}`: {}", target, e)))?;
        Ok(Self::new(self.method.clone(), uri, self.version))
    }
}

impl FromStr for RequestLine {
    type Err = VaultError;

    /// Parse `"GET /path HTTP/1.1"`; the version may be omitted
    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let (method, target) = match (parts.next(), parts.next()) {
            (Some(method), Some(target)) => (method, target),
            _ => return Err(VaultError::HttpError(format!("malformed request line `{}`", line))),
        };
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| VaultError::HttpError(format!("invalid method `{}`", method)))?;
        let version = match parts.next() {
            None | Some("HTTP/1.1") => Version::HTTP_11,
            Some("HTTP/1.0") => Version::HTTP_10,
            Some("HTTP/2") | Some("HTTP/2.0") => Version::HTTP_2,
            Some(other) => return Err(VaultError::HttpError(format!("unsupported version `{}`", other))),
        };
        let mut request = Self::from_parts(method, target)?;
        request.version = version;
        Ok(request)
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.method, self.uri, self.version)
    }
}

/// Sink receiving one response
#[async_trait]
pub trait Connection: Send {
    async fn accept(&mut self, status: StatusCode, headers: HeaderMap, body: Content) -> Result<()>;
}

/// Deferred response, produced when sent to a connection
#[async_trait]
pub trait Response: Send {
    async fn send(self: Box<Self>, connection: &mut dyn Connection) -> Result<()>;
}

pub type BoxResponse = Box<dyn Response>;

/// Request handler
pub trait Slice: Send + Sync {
    fn response(&self, line: RequestLine, headers: HeaderMap, body: Content) -> BoxResponse;
}

pub type SliceHandle = Arc<dyn Slice>;

/// Response with a fixed status, headers and body
pub struct BasicResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Content,
}

impl BasicResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Content::empty(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Content>) -> Self {
        self.body = body.into();
        self
    }

    /// Plain-text body
    pub fn text(self, text: impl Into<String>) -> Self {
        self.header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
        .body(text.into())
    }

    pub fn boxed(self) -> BoxResponse {
        Box::new(self)
    }
}

#[async_trait]
impl Response for BasicResponse {
    async fn send(self: Box<Self>, connection: &mut dyn Connection) -> Result<()> {
        let this = *self;
        connection.accept(this.status, this.headers, this.body).await
    }
}

/// Response whose real value is computed by a future
pub struct AsyncResponse {
    future: BoxFuture<'static, Result<BoxResponse>>,
}

impl AsyncResponse {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<BoxResponse>> + Send + 'static,
    {
        Self { future: future.boxed() }
    }

    pub fn boxed(self) -> BoxResponse {
        Box::new(self)
    }
}

#[async_trait]
impl Response for AsyncResponse {
    async fn send(self: Box<Self>, connection: &mut dyn Connection) -> Result<()> {
        let response = self.future.await?;
        response.send(connection).await
    }
}

/// Slice that becomes available later
///
/// Requests arriving before the inner slice is ready wait for it. If building
/// the slice fails, every request fails with that error.
#[derive(Clone)]
pub struct AsyncSlice {
    slice: Shared<BoxFuture<'static, Result<SliceHandle>>>,
}

impl AsyncSlice {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<SliceHandle>> + Send + 'static,
    {
        Self {
            slice: future.boxed().shared(),
        }
    }
}

impl Slice for AsyncSlice {
    fn response(&self, line: RequestLine, headers: HeaderMap, body: Content) -> BoxResponse {
        let slice = self.slice.clone();
        AsyncResponse::new(async move {
            let slice = slice.await?;
            Ok(slice.response(line, headers, body))
        })
        .boxed()
    }
}

/// Slice answering every request with the same status and message
pub struct StatusSlice {
    status: StatusCode,
    message: Option<String>,
}

impl StatusSlice {
    pub fn new(status: StatusCode) -> Self {
        Self { status, message: None }
    }

    pub fn with_message(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

impl Slice for StatusSlice {
    fn response(&self, _line: RequestLine, _headers: HeaderMap, _body: Content) -> BoxResponse {
        match &self.message {
            Some(message) => BasicResponse::new(self.status).text(message.clone()).boxed(),
            None => BasicResponse::new(self.status).boxed(),
        }
    }
}

/// Slice built from a closure
pub struct SliceFn<F>(F);

pub fn slice_fn<F>(f: F) -> SliceFn<F>
where
    F: Fn(RequestLine, HeaderMap, Content) -> BoxResponse + Send + Sync,
{
    SliceFn(f)
}

impl<F> Slice for SliceFn<F>
where
    F: Fn(RequestLine, HeaderMap, Content) -> BoxResponse + Send + Sync,
{
    fn response(&self, line: RequestLine, headers: HeaderMap, body: Content) -> BoxResponse {
        (self.0)(line, headers, body)
    }
}

/// Response recorded by a [`ResponseCapture`]
#[derive(Debug)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Content,
}

#[async_trait]
impl Response for CapturedResponse {
    async fn send(self: Box<Self>, connection: &mut dyn Connection) -> Result<()> {
        let this = *self;
        connection.accept(this.status, this.headers, this.body).await
    }
}

/// Connection that keeps the response instead of writing it anywhere
#[derive(Default)]
pub struct ResponseCapture {
    captured: Option<CapturedResponse>,
}

impl ResponseCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_accepted(&self) -> bool {
        self.captured.is_some()
    }

    /// The captured response
    ///
    /// # Errors
    ///
    /// Returns an internal error if nothing was sent to this connection.
    pub fn into_response(self) -> Result<CapturedResponse> {
        self.captured
            .ok_or_else(|| VaultError::InternalError("no response was produced".to_string()))
    }
}

#[async_trait]
impl Connection for ResponseCapture {
    async fn accept(&mut self, status: StatusCode, headers: HeaderMap, body: Content) -> Result<()> {
        if self.captured.is_some() {
            return Err(VaultError::InternalError("response already written".to_string()));
        }
        self.captured = Some(CapturedResponse { status, headers, body });
        Ok(())
    }
}

/// Send `response` into a fresh [`ResponseCapture`] and return what it wrote
pub async fn capture(response: BoxResponse) -> Result<CapturedResponse> {
    let mut connection = ResponseCapture::new();
    response.send(&mut connection).await?;
    connection.into_response()
}
