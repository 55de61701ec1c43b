//! Ordered fallback across member repositories

use crate::content::Content;
use crate::error::Result;
use crate::slice::{AsyncResponse, BoxResponse, CapturedResponse, RequestLine, ResponseCapture, Slice, SliceHandle};
use http::{HeaderMap, StatusCode};
use tracing::debug;

/// Slice trying each member in order until one has the artifact
///
/// A member "has" the artifact when it answers with anything but 404. A 404
/// answer or a not-found error moves on to the next member; any other error
/// stops the search and is returned. Later members are not consulted once an
/// earlier one answers. When nobody has the artifact, the last 404 is returned.
pub struct GroupSlice {
    members: Vec<SliceHandle>,
}

impl GroupSlice {
    pub fn new(members: Vec<SliceHandle>) -> Self {
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    async fn resolve(members: Vec<SliceHandle>, line: RequestLine, headers: HeaderMap, body: Content) -> Result<BoxResponse> {
        // Every member may need the request body
        let (shared, mut once) = if members.len() > 1 {
            (Some(body.into_bytes().await?), None)
        } else {
            (None, Some(body))
        };
        let mut last_absent = None;

        for (index, member) in members.iter().enumerate() {
            let request_body = match &shared {
                Some(bytes) => Content::from_bytes(bytes.clone()),
                None => once.take().unwrap_or_else(Content::empty),
            };
            let mut connection = ResponseCapture::new();
            match member
                .response(line.clone(), headers.clone(), request_body)
                .send(&mut connection)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!("Group member {} has no {}: {}", index, line.path(), e);
                    continue;
                }
                Err(e) => return Err(e),
            }
            let response = connection.into_response()?;
            if response.status == StatusCode::NOT_FOUND {
                debug!("Group member {} answered 404 for {}", index, line.path());
                last_absent = Some(response);
                continue;
            }
            return Ok(Box::new(response));
        }
        Ok(match last_absent {
            Some(response) => Box::new(response),
            None => Box::new(CapturedResponse {
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                body: Content::empty(),
            }),
        })
    }
}

impl Slice for GroupSlice {
    fn response(&self, line: RequestLine, headers: HeaderMap, body: Content) -> BoxResponse {
        let members = self.members.clone();
        AsyncResponse::new(Self::resolve(members, line, headers, body)).boxed()
    }
}
