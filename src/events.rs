//! Artifact events for metadata processing
//!
//! Repositories report uploads and deletions as [`ArtifactEvent`]s and proxy
//! repositories report origin downloads as [`ProxyArtifactEvent`]s. Events are
//! queued in memory and a consumer task drains them in batches.
//!
//! Queues exist only when the `metadata` section is configured. Each queue is
//! bounded; once full, the oldest events are dropped to make room.

use crate::config::{MetadataConfig, VaultConfig};
use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events a queue holds before it starts dropping the oldest
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Insert,
    DeleteVersion,
    DeleteAll,
}

/// Change to an artifact of a hosted repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEvent {
    pub repo_type: String,
    pub repo_name: String,
    pub owner: String,
    pub artifact_name: String,
    pub version: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch
    pub created: u64,
    pub kind: EventKind,
}

impl ArtifactEvent {
    pub fn insert(
        repo_type: impl Into<String>,
        repo_name: impl Into<String>,
        owner: impl Into<String>,
        artifact_name: impl Into<String>,
        version: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            repo_type: repo_type.into(),
            repo_name: repo_name.into(),
            owner: owner.into(),
            artifact_name: artifact_name.into(),
            version: version.into(),
            size,
            created: now_millis(),
            kind: EventKind::Insert,
        }
    }

    pub fn delete_version(
        repo_type: impl Into<String>,
        repo_name: impl Into<String>,
        artifact_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            repo_type: repo_type.into(),
            repo_name: repo_name.into(),
            owner: String::new(),
            artifact_name: artifact_name.into(),
            version: version.into(),
            size: 0,
            created: now_millis(),
            kind: EventKind::DeleteVersion,
        }
    }

    pub fn delete_all(
        repo_type: impl Into<String>,
        repo_name: impl Into<String>,
        artifact_name: impl Into<String>,
    ) -> Self {
        Self {
            repo_type: repo_type.into(),
            repo_name: repo_name.into(),
            owner: String::new(),
            artifact_name: artifact_name.into(),
            version: String::new(),
            size: 0,
            created: now_millis(),
            kind: EventKind::DeleteAll,
        }
    }
}

/// Artifact downloaded from an origin by a proxy repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyArtifactEvent {
    pub key: Key,
    pub repo_name: String,
    pub owner: String,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug)]
struct QueueState<T> {
    events: VecDeque<T>,
    dropped: u64,
}

/// Bounded FIFO shared by producers and a draining consumer
#[derive(Debug)]
pub struct EventQueue<T> {
    inner: Arc<Mutex<QueueState<T>>>,
    capacity: usize,
}

impl<T> Clone for EventQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue holding at most `capacity` events (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueState {
                events: VecDeque::new(),
                dropped: 0,
            })),
            capacity: capacity.max(1),
        }
    }

    /// Append `event`, dropping the oldest one when the queue is full
    pub fn enqueue(&self, event: T) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.events.len() >= self.capacity {
            state.events.pop_front();
            state.dropped += 1;
            if state.dropped == 1 {
                warn!("Event queue full ({} events), dropping oldest events", self.capacity);
            }
        }
        state.events.push_back(event);
    }

    /// Remove and return up to `max` of the oldest events
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let count = max.min(state.events.len());
        state.events.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).dropped
    }
}

/// Event queues of a vault: one for hosted artifacts, one per proxy repository
#[derive(Debug)]
pub struct MetadataEventQueues {
    artifacts: EventQueue<ArtifactEvent>,
    proxies: Mutex<HashMap<String, EventQueue<ProxyArtifactEvent>>>,
    capacity: usize,
}

impl Default for MetadataEventQueues {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl MetadataEventQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues each holding at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            artifacts: EventQueue::with_capacity(capacity),
            proxies: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Queues for `config`, or `None` when no metadata section is configured
    pub fn for_config(config: &VaultConfig) -> Option<Arc<Self>> {
        config
            .metadata
            .as_ref()
            .map(|metadata| Arc::new(Self::with_capacity(metadata.capacity)))
    }

    pub fn artifact_queue(&self) -> EventQueue<ArtifactEvent> {
        self.artifacts.clone()
    }

    /// Queue of a proxy repository, created on first use
    pub fn proxy_queue(&self, repo_name: &str) -> EventQueue<ProxyArtifactEvent> {
        self.proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(repo_name.to_string())
            .or_insert_with(|| {
                debug!("Created proxy event queue for {}", repo_name);
                EventQueue::with_capacity(self.capacity)
            })
            .clone()
    }

    /// Drop the queue of a proxy repository; pending events are discarded
    pub fn stop_proxy_processing(&self, repo_name: &str) -> bool {
        self.proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(repo_name)
            .is_some()
    }

    pub fn proxy_repositories(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Drain up to `batch` events from every queue and log them
    ///
    /// Returns the number of events consumed.
    pub fn flush(&self, batch: usize) -> usize {
        let mut consumed = 0;
        for event in self.artifacts.drain(batch) {
            log_event("artifact", &event);
            consumed += 1;
        }
        let proxies: Vec<EventQueue<ProxyArtifactEvent>> = self
            .proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for queue in proxies {
            for event in queue.drain(batch) {
                log_event("proxy", &event);
                consumed += 1;
            }
        }
        consumed
    }

    /// Flush the queues every `interval` on a background task
    pub fn spawn_consumer(self: Arc<Self>, interval: Duration, batch: usize) -> JoinHandle<()> {
        info!("Metadata events consumed every {:?} in batches of {}", interval, batch);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let consumed = self.flush(batch);
                if consumed > 0 {
                    debug!("Consumed {} metadata events", consumed);
                }
            }
        })
    }

    /// Consumer configured by a metadata section
    pub fn start(self: Arc<Self>, config: &MetadataConfig) -> JoinHandle<()> {
        self.spawn_consumer(config.interval(), config.batch_size)
    }
}

fn log_event<E: Serialize>(kind: &str, event: &E) {
    match serde_json::to_string(event) {
        Ok(json) => info!("{} event {}", kind, json),
        Err(e) => warn!("Failed to serialize {} event: {}", kind, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_is_fifo_and_bounded() {
        let queue = EventQueue::new();
        for n in 0..5 {
            queue.enqueue(n);
        }
        assert_eq!(queue.drain(2), vec![0, 1]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(10), vec![2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_proxy_queue_shared_per_repo() {
        let queues = MetadataEventQueues::new();
        let event = ProxyArtifactEvent {
            key: Key::new("a/b"),
            repo_name: "central".to_string(),
            owner: "anonymous".to_string(),
        };
        queues.proxy_queue("central").enqueue(event.clone());
        assert_eq!(queues.proxy_queue("central").drain(1), vec![event]);
        assert!(queues.proxy_queue("other").is_empty());
        assert_eq!(queues.proxy_repositories(), vec!["central", "other"]);
        assert!(queues.stop_proxy_processing("other"));
        assert!(!queues.stop_proxy_processing("other"));
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let queue = EventQueue::with_capacity(3);
        for n in 0..5 {
            queue.enqueue(n);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.drain(10), vec![2, 3, 4]);
    }

    #[test]
    fn test_queues_only_with_metadata_section() {
        let plain = VaultConfig::from_yaml_str("{}").unwrap();
        assert!(MetadataEventQueues::for_config(&plain).is_none());

        let configured = VaultConfig::from_yaml_str("metadata:\n  capacity: 2\n").unwrap();
        let queues = MetadataEventQueues::for_config(&configured).unwrap();
        assert_eq!(queues.artifact_queue().capacity(), 2);
        assert_eq!(queues.proxy_queue("central").capacity(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumer_drains_queues() {
        let queues = Arc::new(MetadataEventQueues::new());
        let consumer = queues.clone().spawn_consumer(Duration::from_secs(5), 100);
        // let the first immediate tick pass
        tokio::time::sleep(Duration::from_millis(1)).await;

        queues
            .artifact_queue()
            .enqueue(ArtifactEvent::insert("file", "local", "alice", "lib.jar", "1.0", 3));
        queues.proxy_queue("central").enqueue(ProxyArtifactEvent {
            key: Key::new("a/b"),
            repo_name: "central".to_string(),
            owner: "anonymous".to_string(),
        });
        assert_eq!(queues.artifact_queue().len(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(queues.artifact_queue().is_empty());
        assert!(queues.proxy_queue("central").is_empty());
        consumer.abort();
    }

    #[test]
    fn test_flush_counts_events() {
        let queues = MetadataEventQueues::new();
        for n in 0..3 {
            queues
                .artifact_queue()
                .enqueue(ArtifactEvent::insert("file", "local", "alice", format!("{}.jar", n), "1.0", 1));
        }
        assert_eq!(queues.flush(2), 2);
        assert_eq!(queues.flush(2), 1);
        assert_eq!(queues.flush(2), 0);
    }

    #[test]
    fn test_event_json_shape() {
        let event = ArtifactEvent::insert("file", "local", "alice", "lib.jar", "1.0", 3);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "insert");
        assert_eq!(json["artifact_name"], "lib.jar");
    }
}
