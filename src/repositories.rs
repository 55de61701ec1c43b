//! Repository slices built from configuration
//!
//! [`RepositorySlices`] routes a request by the first path segment to the
//! repository of that name, strips the segment, and hands the rest of the
//! request to the repository's slice. Slices are built on first use and then
//! reused. A repository whose section is broken answers 500 with the reason
//! while the other repositories keep working.

use crate::auth::Authentication;
use crate::config::{RepoConfig, VaultConfig};
use crate::content::Content;
use crate::error::{Result, VaultError};
use crate::events::MetadataEventQueues;
use crate::files::FilesSlice;
use crate::group::GroupSlice;
use crate::metrics::{MeasuredSlice, MetricsSlice, VaultMetrics};
use crate::proxy::ProxySlice;
use crate::proxy_cache::{Cache, CacheSettings, NopCache, ProxyCaches};
use crate::remote::HttpRemote;
use crate::route::{RtRule, SliceRoute};
use crate::slice::{BoxResponse, RequestLine, Slice, SliceHandle, StatusSlice};
use crate::storage::StorageConfig;
use crate::storages_cache::StoragesCache;
use crate::timeout::TimeoutSlice;
use http::{HeaderMap, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

/// Router from repository name to repository slice
pub struct RepositorySlices {
    config: Arc<VaultConfig>,
    storages: Arc<StoragesCache>,
    events: Option<Arc<MetadataEventQueues>>,
    auth: Arc<dyn Authentication>,
    metrics: Option<Arc<VaultMetrics>>,
    caches: ProxyCaches,
    slices: Mutex<HashMap<String, SliceHandle>>,
}

impl RepositorySlices {
    pub fn new(config: Arc<VaultConfig>, storages: Arc<StoragesCache>) -> Self {
        let auth = config.authentication();
        Self {
            config,
            storages,
            events: None,
            auth,
            metrics: None,
            caches: ProxyCaches::new(),
            slices: Mutex::new(HashMap::new()),
        }
    }

    /// Report artifact changes and proxy downloads to `events`
    pub fn with_events(mut self, events: Arc<MetadataEventQueues>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<VaultMetrics>) -> Self {
        self.caches = ProxyCaches::new().with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// Proxy caches shared by the remotes of all proxy repositories
    pub fn proxy_caches(&self) -> &ProxyCaches {
        &self.caches
    }

    pub fn with_authentication(mut self, auth: Arc<dyn Authentication>) -> Self {
        self.auth = auth;
        self
    }

    /// The slice of repository `name`, or a 404 slice if there is none
    pub fn slice(&self, name: &str) -> SliceHandle {
        if !self.config.repositories.contains_key(name) {
            debug!("Repository {} not configured", name);
            return Arc::new(StatusSlice::with_message(
                StatusCode::NOT_FOUND,
                format!("Repository '{}' not found", name),
            ));
        }
        match self.resolve(name, &mut Vec::new()) {
            Ok(slice) => slice,
            Err(e) => {
                error!("Repository {} is misconfigured: {}", name, e);
                let slice: SliceHandle = Arc::new(StatusSlice::with_message(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Repository '{}' is misconfigured: {}", name, e),
                ));
                self.remember(name, slice)
            }
        }
    }

    /// Cached slice or a freshly built one; `visiting` guards group cycles
    fn resolve(&self, name: &str, visiting: &mut Vec<String>) -> Result<SliceHandle> {
        if let Some(slice) = self.cached(name) {
            return Ok(slice);
        }
        if visiting.iter().any(|seen| seen == name) {
            return Err(VaultError::ConfigError(format!(
                "group cycle through {}",
                visiting.join(" -> ")
            )));
        }
        let repo = self
            .config
            .repositories
            .get(name)
            .ok_or_else(|| VaultError::ConfigError(format!("unknown repository `{}`", name)))?;

        visiting.push(name.to_string());
        let built = self.build(name, repo, visiting);
        visiting.pop();
        let slice = self.decorate(name, repo, built?);
        info!("Repository {} ({}) ready", name, repo.kind);
        Ok(self.remember(name, slice))
    }

    fn cached(&self, name: &str) -> Option<SliceHandle> {
        self.slices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Store `slice` unless another caller got there first; return the winner
    fn remember(&self, name: &str, slice: SliceHandle) -> SliceHandle {
        self.slices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert(slice)
            .clone()
    }

    fn build(&self, name: &str, repo: &RepoConfig, visiting: &mut Vec<String>) -> Result<SliceHandle> {
        match repo.kind.as_str() {
            "file" => {
                let storage = self.storages.from_section(repo.storage.as_ref(), &self.config.storages)?;
                Ok(match &self.events {
                    Some(events) => Arc::new(FilesSlice::with_events(
                        name,
                        storage,
                        self.auth.clone(),
                        events.artifact_queue(),
                    )),
                    None => Arc::new(FilesSlice::new(name, storage, self.auth.clone())),
                })
            }
            "file-proxy" => self.build_proxy(name, repo),
            "group" => {
                if repo.members.is_empty() {
                    return Err(VaultError::ConfigError("group has no members".to_string()));
                }
                let members = repo
                    .members
                    .iter()
                    .map(|member| {
                        if !self.config.repositories.contains_key(member) {
                            return Err(VaultError::ConfigError(format!("unknown group member `{}`", member)));
                        }
                        self.resolve(member, visiting)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(GroupSlice::new(members)))
            }
            other => Err(VaultError::ConfigError(format!("unsupported repository type `{}`", other))),
        }
    }

    fn build_proxy(&self, name: &str, repo: &RepoConfig) -> Result<SliceHandle> {
        if repo.remotes.is_empty() {
            return Err(VaultError::ConfigError("proxy has no remotes".to_string()));
        }
        let events = self.events.as_ref().map(|events| events.proxy_queue(name));
        let mut slices: Vec<SliceHandle> = Vec::with_capacity(repo.remotes.len());
        for remote in &repo.remotes {
            let endpoint = remote.endpoint(&self.config.storages)?;
            let cache: Arc<dyn Cache> = match (&endpoint.cache, &repo.storage) {
                (Some(cache), _) => self.caches.cache(&cache.storage, cache.settings, &self.storages)? as Arc<dyn Cache>,
                (None, Some(section)) => {
                    let storage = StorageConfig::resolve(section, &self.config.storages)?;
                    self.caches.cache(&storage, CacheSettings::default(), &self.storages)? as Arc<dyn Cache>
                }
                (None, None) => Arc::new(NopCache),
            };
            let remote = Arc::new(HttpRemote::new(endpoint)?);
            let mut slice = ProxySlice::new(name, remote, cache, self.auth.clone());
            if let Some(events) = &events {
                slice = slice.with_events(events.clone());
            }
            slices.push(Arc::new(slice));
        }
        if slices.len() == 1 {
            Ok(slices.remove(0))
        } else {
            Ok(Arc::new(GroupSlice::new(slices)))
        }
    }

    fn decorate(&self, name: &str, repo: &RepoConfig, slice: SliceHandle) -> SliceHandle {
        let slice = match repo.timeout() {
            Some(timeout) => Arc::new(TimeoutSlice::new(slice, timeout)) as SliceHandle,
            None => slice,
        };
        match &self.metrics {
            Some(metrics) => Arc::new(MeasuredSlice::new(slice, name, metrics.clone())),
            None => slice,
        }
    }
}

/// Root slice of a vault
///
/// Requests for the configured metrics path go to a [`MetricsSlice`] when
/// metrics are enabled; everything else goes to [`RepositorySlices`]. The
/// server-wide request timeout, if any, bounds the whole root slice.
/// Repositories report events only when `events` is given.
pub fn vault_slice(
    config: Arc<VaultConfig>,
    events: Option<Arc<MetadataEventQueues>>,
    metrics: Option<Arc<VaultMetrics>>,
) -> Result<SliceHandle> {
    let mut storages = StoragesCache::default();
    if let Some(metrics) = &metrics {
        storages = storages.with_metrics(metrics.clone());
    }
    let mut repositories = RepositorySlices::new(config.clone(), Arc::new(storages));
    if let Some(events) = events {
        repositories = repositories.with_events(events);
    }
    if let Some(metrics) = &metrics {
        repositories = repositories.with_metrics(metrics.clone());
    }
    let root: SliceHandle = match metrics {
        Some(metrics) if config.metrics.enabled => {
            let rule = RtRule::by_path(&regex::escape(&config.metrics.path))?;
            Arc::new(
                SliceRoute::new()
                    .route(rule, Arc::new(MetricsSlice::new(metrics)))
                    .fallback(Arc::new(repositories)),
            )
        }
        _ => Arc::new(repositories),
    };
    Ok(match config.server.request_timeout() {
        Some(timeout) => Arc::new(TimeoutSlice::new(root, timeout)),
        None => root,
    })
}

impl Slice for RepositorySlices {
    fn response(&self, line: RequestLine, headers: HeaderMap, body: Content) -> BoxResponse {
        let path = line.path().trim_start_matches('/');
        let (name, rest) = path.split_once('/').unwrap_or((path, ""));
        if name.is_empty() {
            return StatusSlice::new(StatusCode::NOT_FOUND).response(line, headers, body);
        }
        let slice = self.slice(name);
        match line.with_path(rest) {
            Ok(inner) => slice.response(inner, headers, body),
            Err(e) => StatusSlice::with_message(StatusCode::BAD_REQUEST, e.to_string()).response(line, headers, body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::capture;
    use bytes::Bytes;

    fn slices(yaml: &str) -> RepositorySlices {
        let config = Arc::new(VaultConfig::from_yaml_str(yaml).unwrap());
        RepositorySlices::new(config, Arc::new(StoragesCache::default()))
    }

    async fn send(slices: &RepositorySlices, request: &str, body: Content) -> crate::slice::CapturedResponse {
        capture(slices.response(request.parse().unwrap(), HeaderMap::new(), body))
            .await
            .unwrap()
    }

    const CONFIG: &str = r#"
storages:
  mem:
    type: in-memory
    name: shared
repositories:
  one:
    type: file
    storage: mem
  two:
    type: file
    storage:
      type: sub
      prefix: two
      storage: mem
  both:
    type: group
    members: [one, two]
  broken:
    type: file
  loop-a:
    type: group
    members: [loop-b]
  loop-b:
    type: group
    members: [loop-a]
"#;

    #[tokio::test]
    async fn test_routes_by_first_segment() {
        let slices = slices(CONFIG);
        let put = send(&slices, "PUT /two/lib/a.jar", Content::from_bytes("jar")).await;
        assert_eq!(put.status, StatusCode::CREATED);

        assert_eq!(send(&slices, "GET /one/lib/a.jar", Content::empty()).await.status, StatusCode::NOT_FOUND);
        let found = send(&slices, "GET /both/lib/a.jar", Content::empty()).await;
        assert_eq!(found.status, StatusCode::OK);
        assert_eq!(found.body.into_bytes().await.unwrap(), Bytes::from("jar"));
    }

    #[tokio::test]
    async fn test_unknown_repository_is_404() {
        let slices = slices(CONFIG);
        assert_eq!(send(&slices, "GET /nope/a", Content::empty()).await.status, StatusCode::NOT_FOUND);
        assert_eq!(send(&slices, "GET /", Content::empty()).await.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_broken_repository_isolated() {
        let slices = slices(CONFIG);
        let broken = send(&slices, "GET /broken/a", Content::empty()).await;
        assert_eq!(broken.status, StatusCode::INTERNAL_SERVER_ERROR);
        let text = broken.body.into_bytes().await.unwrap();
        assert!(String::from_utf8_lossy(&text).contains("storage section is missing"));

        let cycle = send(&slices, "GET /loop-a/x", Content::empty()).await;
        assert_eq!(cycle.status, StatusCode::INTERNAL_SERVER_ERROR);

        let put = send(&slices, "PUT /one/x", Content::from_bytes("1")).await;
        assert_eq!(put.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_vault_slice_serves_metrics() {
        let config = Arc::new(VaultConfig::from_yaml_str(CONFIG).unwrap());
        let metrics = Arc::new(VaultMetrics::new().unwrap());
        let root = vault_slice(config, None, Some(metrics)).unwrap();

        let put = capture(root.response("PUT /one/a".parse().unwrap(), HeaderMap::new(), Content::from_bytes("x")))
            .await
            .unwrap();
        assert_eq!(put.status, StatusCode::CREATED);

        let scrape = capture(root.response("GET /metrics".parse().unwrap(), HeaderMap::new(), Content::empty()))
            .await
            .unwrap();
        assert_eq!(scrape.status, StatusCode::OK);
        let text = scrape.body.into_bytes().await.unwrap();
        assert!(String::from_utf8_lossy(&text).contains("repository=\"one\""));
    }

    #[tokio::test]
    async fn test_events_follow_metadata_section() {
        let plain = Arc::new(VaultConfig::from_yaml_str(CONFIG).unwrap());
        assert!(MetadataEventQueues::for_config(&plain).is_none());
        let slices = RepositorySlices::new(plain, Arc::new(StoragesCache::default()));
        assert_eq!(send(&slices, "PUT /one/a", Content::from_bytes("x")).await.status, StatusCode::CREATED);
        assert!(slices.events.is_none());

        let with_metadata = format!("{}metadata:\n  capacity: 4\n", CONFIG);
        let config = Arc::new(VaultConfig::from_yaml_str(&with_metadata).unwrap());
        let events = MetadataEventQueues::for_config(&config).unwrap();
        let slices = RepositorySlices::new(config, Arc::new(StoragesCache::default())).with_events(events.clone());
        send(&slices, "PUT /one/a", Content::from_bytes("x")).await;
        assert_eq!(events.artifact_queue().len(), 1);
    }

    #[test]
    fn test_remotes_share_one_cache_per_storage() {
        let slices = slices(
            r#"
storages:
  shared:
    type: in-memory
    name: proxy-cache
repositories:
  central:
    type: file-proxy
    remotes:
      - url: https://one.example.com/repo
        cache:
          storage: shared
          max_size: 100
      - url: https://two.example.com/repo
        cache:
          storage: shared
          max_size: 100
  mirror:
    type: file-proxy
    storage: shared
    remotes:
      - url: https://three.example.com/repo
"#,
        );
        slices.slice("central");
        slices.slice("mirror");
        assert_eq!(slices.proxy_caches().len(), 1);
    }

    #[test]
    fn test_slices_are_memoized() {
        let slices = slices(CONFIG);
        let a = slices.slice("one");
        let b = slices.slice("one");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
