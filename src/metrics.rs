//! Prometheus metrics for repositories, the proxy cache and storages
//!
//! [`VaultMetrics`] owns its own [`Registry`] so several vaults (or tests) in one
//! process never collide on metric names. [`MeasuredSlice`] records per-request
//! counters around any slice, and [`MetricsSlice`] serves the text exposition.

use crate::content::Content;
use crate::error::{Result, VaultError};
use crate::slice::{BasicResponse, BoxResponse, Connection, RequestLine, Response, Slice, SliceHandle};
use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, StatusCode};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// Vault-wide metric families
#[derive(Clone)]
pub struct VaultMetrics {
    registry: Registry,

    /// Requests by repository and response status
    pub requests_total: IntCounterVec,

    /// Time to produce a response, by repository
    pub request_duration_seconds: HistogramVec,

    /// Proxy cache lookups answered from storage
    pub cache_hits_total: IntCounter,

    /// Proxy cache lookups that went to the origin
    pub cache_misses_total: IntCounter,

    /// Entries evicted from proxy caches
    pub cache_evictions_total: IntCounter,

    /// Origin fetches by result (success, absent, failure)
    pub origin_fetches_total: IntCounterVec,

    /// Storage instances built by the storages cache
    pub storages_constructed_total: IntCounter,
}

impl VaultMetrics {
    /// Metrics in a fresh private registry
    pub fn new() -> std::result::Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Metrics registered into `registry`
    pub fn with_registry(registry: Registry) -> std::result::Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new("pkgvault_requests_total", "Total number of repository requests"),
            &["repository", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "pkgvault_request_duration_seconds",
                "Time to produce a repository response in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["repository"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let cache_hits_total = IntCounter::new("pkgvault_cache_hits_total", "Proxy cache hits")?;
        registry.register(Box::new(cache_hits_total.clone()))?;

        let cache_misses_total = IntCounter::new("pkgvault_cache_misses_total", "Proxy cache misses")?;
        registry.register(Box::new(cache_misses_total.clone()))?;

        let cache_evictions_total =
            IntCounter::new("pkgvault_cache_evictions_total", "Entries evicted from proxy caches")?;
        registry.register(Box::new(cache_evictions_total.clone()))?;

        let origin_fetches_total = IntCounterVec::new(
            Opts::new("pkgvault_origin_fetches_total", "Origin fetches by result"),
            &["result"],
        )?;
        registry.register(Box::new(origin_fetches_total.clone()))?;

        let storages_constructed_total = IntCounter::new(
            "pkgvault_storages_constructed_total",
            "Storage instances constructed",
        )?;
        registry.register(Box::new(storages_constructed_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            cache_hits_total,
            cache_misses_total,
            cache_evictions_total,
            origin_fetches_total,
            storages_constructed_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_request(&self, repository: &str, status: u16, started: Instant) {
        self.requests_total
            .with_label_values(&[repository, &status.to_string()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[repository])
            .observe(started.elapsed().as_secs_f64());
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits_total.inc();
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses_total.inc();
    }

    pub fn record_cache_evictions(&self, count: u64) {
        self.cache_evictions_total.inc_by(count);
    }

    pub fn record_origin_fetch(&self, result: &Result<Content>) {
        let label = match result {
            Ok(_) => "success",
            Err(e) if e.is_not_found() => "absent",
            Err(_) => "failure",
        };
        self.origin_fetches_total.with_label_values(&[label]).inc();
    }

    pub fn record_storage_constructed(&self) {
        self.storages_constructed_total.inc();
    }

    /// Text exposition of every registered family
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| VaultError::InternalError(format!("failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| VaultError::InternalError(e.to_string()))
    }
}

/// Decorator recording request count and latency for one repository
pub struct MeasuredSlice {
    origin: SliceHandle,
    repository: String,
    metrics: Arc<VaultMetrics>,
}

impl MeasuredSlice {
    pub fn new(origin: SliceHandle, repository: impl Into<String>, metrics: Arc<VaultMetrics>) -> Self {
        Self {
            origin,
            repository: repository.into(),
            metrics,
        }
    }
}

impl Slice for MeasuredSlice {
    fn response(&self, line: RequestLine, headers: HeaderMap, body: Content) -> BoxResponse {
        Box::new(MeasuredResponse {
            origin: self.origin.response(line, headers, body),
            repository: self.repository.clone(),
            metrics: self.metrics.clone(),
            started: Instant::now(),
        })
    }
}

struct MeasuredResponse {
    origin: BoxResponse,
    repository: String,
    metrics: Arc<VaultMetrics>,
    started: Instant,
}

struct StatusRecorder<'a> {
    inner: &'a mut dyn Connection,
    status: Option<StatusCode>,
}

#[async_trait]
impl Connection for StatusRecorder<'_> {
    async fn accept(&mut self, status: StatusCode, headers: HeaderMap, body: Content) -> Result<()> {
        self.status = Some(status);
        self.inner.accept(status, headers, body).await
    }
}

#[async_trait]
impl Response for MeasuredResponse {
    async fn send(self: Box<Self>, connection: &mut dyn Connection) -> Result<()> {
        let this = *self;
        let mut recorder = StatusRecorder {
            inner: connection,
            status: None,
        };
        let result = this.origin.send(&mut recorder).await;
        let status = match (&result, recorder.status) {
            (_, Some(status)) => status.as_u16(),
            (Err(e), None) => e.to_http_status(),
            (Ok(()), None) => 0,
        };
        this.metrics.record_request(&this.repository, status, this.started);
        result
    }
}

/// Slice serving the Prometheus text format
pub struct MetricsSlice {
    metrics: Arc<VaultMetrics>,
}

impl MetricsSlice {
    pub fn new(metrics: Arc<VaultMetrics>) -> Self {
        Self { metrics }
    }
}

impl Slice for MetricsSlice {
    fn response(&self, _line: RequestLine, _headers: HeaderMap, _body: Content) -> BoxResponse {
        match self.metrics.encode() {
            Ok(text) => BasicResponse::ok()
                .header(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                )
                .body(text)
                .boxed(),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                BasicResponse::new(StatusCode::INTERNAL_SERVER_ERROR).text(e.to_string()).boxed()
            }
        }
    }
}
