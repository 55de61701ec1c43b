//! HTTP front end
//!
//! [`SliceServer`] accepts HTTP/1 connections with hyper and hands every
//! request to one root slice. Request bodies are streamed into the slice as
//! [`Content`]; response bodies are streamed back the same way. An error
//! returned by a slice is rendered with [`VaultError::to_http_status`] and the
//! error text as body.

use crate::content::Content;
use crate::error::{Result, VaultError};
use crate::slice::{Connection, RequestLine, SliceHandle};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, TryStreamExt};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Request, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, BodyStream, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

type ResponseBody = UnsyncBoxBody<Bytes, VaultError>;

/// HTTP server dispatching every request to a slice
pub struct SliceServer {
    slice: SliceHandle,
}

impl SliceServer {
    pub fn new(slice: SliceHandle) -> Self {
        Self { slice }
    }

    /// Bind `addr` and serve until the process ends
    pub async fn start(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted on `listener`
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.serve_until(listener, future::pending()).await
    }

    /// Serve connections until `shutdown` resolves
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn serve_until<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("pkgvault listening on http://{}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => {
                    info!("Shutting down listener");
                    return Ok(());
                }
            };
            let io = TokioIo::new(stream);
            let slice = self.slice.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let slice = slice.clone();
                    async move { Ok::<_, Infallible>(handle_request(slice, req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }
    }
}

/// Run one request through the slice and render the outcome
async fn handle_request(slice: SliceHandle, req: Request<Incoming>) -> http::Response<ResponseBody> {
    let started = Instant::now();
    let (parts, incoming) = req.into_parts();
    let line = RequestLine::new(parts.method, parts.uri, parts.version);
    let size = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let frames = TryStreamExt::map_err(BodyStream::new(incoming), |e| VaultError::HttpError(e.to_string()));
    let body = frames.try_filter_map(|frame| async move { Ok(frame.into_data().ok()) });
    let request = Content::from_stream(body, size);

    let summary = line.to_string();
    let mut connection = HyperConnection::default();
    let outcome = slice
        .response(line, parts.headers, request)
        .send(&mut connection)
        .await;

    let response = match (outcome, connection.response) {
        (Ok(()), Some(response)) => response,
        (Ok(()), None) => error_response(&VaultError::InternalError(
            "slice completed without a response".to_string(),
        )),
        (Err(e), _) => {
            if e.to_http_status() >= 500 {
                warn!("{} failed: {}", summary, e);
            } else {
                debug!("{} rejected: {}", summary, e);
            }
            error_response(&e)
        }
    };
    debug!(
        "{} -> {} in {:?}",
        summary,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}

/// Connection collecting the response hyper will write
#[derive(Default)]
struct HyperConnection {
    response: Option<http::Response<ResponseBody>>,
}

#[async_trait]
impl Connection for HyperConnection {
    async fn accept(&mut self, status: StatusCode, mut headers: HeaderMap, body: Content) -> Result<()> {
        if self.response.is_some() {
            return Err(VaultError::InternalError("response already accepted".to_string()));
        }
        let bodiless = status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED;
        if let Some(size) = body.size().filter(|_| !bodiless) {
            if !headers.contains_key(CONTENT_LENGTH) {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
            }
        }
        let body = StreamBody::new(body.into_stream().map_ok(Frame::data)).boxed_unsync();
        let mut response = http::Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        self.response = Some(response);
        Ok(())
    }
}

fn error_response(err: &VaultError) -> http::Response<ResponseBody> {
    let status = StatusCode::from_u16(err.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let text = Bytes::from(err.to_string());
    let mut response = http::Response::new(
        http_body_util::Full::new(text)
            .map_err(|never: Infallible| match never {})
            .boxed_unsync(),
    );
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_adds_length() {
        let mut connection = HyperConnection::default();
        connection
            .accept(StatusCode::OK, HeaderMap::new(), Content::from_bytes("abc"))
            .await
            .unwrap();
        let response = connection.response.take().unwrap();
        assert_eq!(response.headers()[CONTENT_LENGTH], "3");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from("abc"));
    }

    #[tokio::test]
    async fn test_no_length_on_no_content() {
        let mut connection = HyperConnection::default();
        connection
            .accept(StatusCode::NO_CONTENT, HeaderMap::new(), Content::empty())
            .await
            .unwrap();
        assert!(!connection.response.unwrap().headers().contains_key(CONTENT_LENGTH));
    }

    #[tokio::test]
    async fn test_connection_rejects_second_accept() {
        let mut connection = HyperConnection::default();
        connection
            .accept(StatusCode::OK, HeaderMap::new(), Content::empty())
            .await
            .unwrap();
        assert!(connection
            .accept(StatusCode::OK, HeaderMap::new(), Content::empty())
            .await
            .is_err());
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(&VaultError::Timeout("slow".to_string()));
        assert_eq!(response.status().as_u16(), VaultError::Timeout(String::new()).to_http_status());
        let response = error_response(&VaultError::origin_server_error(502, "bad gateway"));
        assert!(response.status().is_server_error());
    }
}
