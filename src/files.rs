//! Hosted file repository slice

use crate::auth::{AuthUser, Authentication};
use crate::content::Content;
use crate::events::{ArtifactEvent, EventQueue};
use crate::key::Key;
use crate::route::{RtRule, SliceRoute};
use crate::slice::{AsyncResponse, BasicResponse, BoxResponse, RequestLine, Slice, StatusSlice};
use crate::storage::StorageHandle;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::sync::Arc;
use tracing::{debug, info};

/// Repository type reported in artifact events
pub const REPO_TYPE: &str = "file";

const OCTET_STREAM: &str = "application/octet-stream";
const PLAIN_TEXT: &str = "text/plain";
const JSON: &str = "application/json";

struct FilesContext {
    repo_name: String,
    storage: StorageHandle,
    auth: Arc<dyn Authentication>,
    events: Option<EventQueue<ArtifactEvent>>,
}

impl FilesContext {
    fn authorize(&self, line: &RequestLine, headers: &HeaderMap) -> std::result::Result<AuthUser, BoxResponse> {
        self.auth.authenticate(line, headers).ok_or_else(|| {
            BasicResponse::new(StatusCode::UNAUTHORIZED)
                .header(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"pkgvault\""))
                .boxed()
        })
    }
}

/// Plain file repository: download, upload, delete and list stored files
///
/// `GET` with an `Accept` of `text/plain` or `application/json` lists the keys
/// under the requested path; any other `GET` downloads the file.
pub struct FilesSlice {
    route: SliceRoute,
}

impl FilesSlice {
    pub fn new(repo_name: impl Into<String>, storage: StorageHandle, auth: Arc<dyn Authentication>) -> Self {
        Self::build(FilesContext {
            repo_name: repo_name.into(),
            storage,
            auth,
            events: None,
        })
    }

    pub fn with_events(
        repo_name: impl Into<String>,
        storage: StorageHandle,
        auth: Arc<dyn Authentication>,
        events: EventQueue<ArtifactEvent>,
    ) -> Self {
        Self::build(FilesContext {
            repo_name: repo_name.into(),
            storage,
            auth,
            events: Some(events),
        })
    }

    fn build(context: FilesContext) -> Self {
        let ctx = Arc::new(context);
        let accepts = |mime: &str| {
            RtRule::by_header_matching("accept", &format!("(?:.*,\\s*)?{}(?:;.*)?(?:,.*)?", regex::escape(mime)))
        };
        let mut route = SliceRoute::new().route(RtRule::by_method([Method::HEAD]), Arc::new(Head(ctx.clone())));
        // Header patterns are constants, so compilation cannot fail at runtime
        if let (Ok(text), Ok(json)) = (accepts(PLAIN_TEXT), accepts(JSON)) {
            route = route
                .route(
                    RtRule::All(vec![RtRule::by_method([Method::GET]), text]),
                    Arc::new(List { ctx: ctx.clone(), json: false }),
                )
                .route(
                    RtRule::All(vec![RtRule::by_method([Method::GET]), json]),
                    Arc::new(List { ctx: ctx.clone(), json: true }),
                );
        }
        let route = route
            .route(RtRule::by_method([Method::GET]), Arc::new(Download(ctx.clone())))
            .route(RtRule::by_method([Method::PUT]), Arc::new(Upload(ctx.clone())))
            .route(RtRule::by_method([Method::DELETE]), Arc::new(Delete(ctx)))
            .fallback(Arc::new(StatusSlice::new(StatusCode::METHOD_NOT_ALLOWED)));
        Self { route }
    }
}

impl Slice for FilesSlice {
    fn response(&self, line: RequestLine, headers: HeaderMap, body: Content) -> BoxResponse {
        self.route.response(line, headers, body)
    }
}

struct Download(Arc<FilesContext>);

impl Slice for Download {
    fn response(&self, line: RequestLine, headers: HeaderMap, _body: Content) -> BoxResponse {
        if let Err(denied) = self.0.authorize(&line, &headers) {
            return denied;
        }
        let ctx = self.0.clone();
        let key = Key::new(line.path());
        AsyncResponse::new(async move {
            if key.is_root() {
                return Ok(BasicResponse::not_found().boxed());
            }
            let content = match ctx.storage.value(&key).await {
                Ok(content) => content,
                Err(e) if e.is_not_found() => return Ok(BasicResponse::not_found().boxed()),
                Err(e) => return Err(e),
            };
            let mut response = BasicResponse::ok().header(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
            if let Some(size) = content.size() {
                response = response.header(CONTENT_LENGTH, HeaderValue::from(size));
            }
            Ok(response.body(content).boxed())
        })
        .boxed()
    }
}

struct Head(Arc<FilesContext>);

impl Slice for Head {
    fn response(&self, line: RequestLine, headers: HeaderMap, _body: Content) -> BoxResponse {
        if let Err(denied) = self.0.authorize(&line, &headers) {
            return denied;
        }
        let ctx = self.0.clone();
        let key = Key::new(line.path());
        AsyncResponse::new(async move {
            if key.is_root() || !ctx.storage.exists(&key).await? {
                return Ok(BasicResponse::not_found().boxed());
            }
            let size = ctx.storage.size(&key).await?;
            Ok(BasicResponse::ok()
                .header(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM))
                .header(CONTENT_LENGTH, HeaderValue::from(size))
                .boxed())
        })
        .boxed()
    }
}

struct List {
    ctx: Arc<FilesContext>,
    json: bool,
}

impl Slice for List {
    fn response(&self, line: RequestLine, headers: HeaderMap, _body: Content) -> BoxResponse {
        if let Err(denied) = self.ctx.authorize(&line, &headers) {
            return denied;
        }
        let ctx = self.ctx.clone();
        let json = self.json;
        let prefix = Key::new(line.path());
        AsyncResponse::new(async move {
            let keys: Vec<String> = ctx.storage.list(&prefix).await?.iter().map(Key::string).collect();
            let (body, mime) = if json {
                let body = serde_json::to_string(&keys)
                    .map_err(|e| crate::error::VaultError::InternalError(e.to_string()))?;
                (body, JSON)
            } else {
                (keys.join("\n"), PLAIN_TEXT)
            };
            Ok(BasicResponse::ok()
                .header(CONTENT_TYPE, HeaderValue::from_static(mime))
                .body(body)
                .boxed())
        })
        .boxed()
    }
}

struct Upload(Arc<FilesContext>);

impl Slice for Upload {
    fn response(&self, line: RequestLine, headers: HeaderMap, body: Content) -> BoxResponse {
        let user = match self.0.authorize(&line, &headers) {
            Ok(user) => user,
            Err(denied) => return denied,
        };
        let ctx = self.0.clone();
        let key = Key::new(line.path());
        AsyncResponse::new(async move {
            if key.is_root() {
                return Ok(BasicResponse::new(StatusCode::BAD_REQUEST).text("missing file name").boxed());
            }
            ctx.storage.save(&key, body).await?;
            info!("{}: {} uploaded {}", ctx.repo_name, user.name(), key);
            if let Some(events) = &ctx.events {
                let size = ctx.storage.size(&key).await?;
                events.enqueue(ArtifactEvent::insert(
                    REPO_TYPE,
                    ctx.repo_name.clone(),
                    user.name(),
                    key.string(),
                    "UNKNOWN",
                    size,
                ));
            }
            Ok(BasicResponse::new(StatusCode::CREATED).boxed())
        })
        .boxed()
    }
}

struct Delete(Arc<FilesContext>);

impl Slice for Delete {
    fn response(&self, line: RequestLine, headers: HeaderMap, _body: Content) -> BoxResponse {
        if let Err(denied) = self.0.authorize(&line, &headers) {
            return denied;
        }
        let ctx = self.0.clone();
        let key = Key::new(line.path());
        AsyncResponse::new(async move {
            if key.is_root() {
                return Ok(BasicResponse::not_found().boxed());
            }
            match ctx.storage.delete(&key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => return Ok(BasicResponse::not_found().boxed()),
                Err(e) => return Err(e),
            }
            debug!("{}: deleted {}", ctx.repo_name, key);
            if let Some(events) = &ctx.events {
                events.enqueue(ArtifactEvent::delete_version(
                    REPO_TYPE,
                    ctx.repo_name.clone(),
                    key.string(),
                    "UNKNOWN",
                ));
            }
            Ok(BasicResponse::new(StatusCode::NO_CONTENT).boxed())
        })
        .boxed()
    }
}
