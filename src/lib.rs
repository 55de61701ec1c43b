//! pkgvault
//!
//! An artifact repository server. Artifacts live in pluggable key-value
//! storages and are served over HTTP by repositories of three kinds: local
//! file repositories, caching proxies in front of remote origins, and groups
//! that search their members in order.
//!
//! # Overview
//!
//! Every request handler is a [`Slice`]. A slice takes the request line,
//! headers and body and returns a deferred [`slice::Response`] that writes
//! status, headers and a streamed [`Content`] body to a
//! [`slice::Connection`]. Slices compose: [`route::SliceRoute`] dispatches by
//! rules, [`group::GroupSlice`] falls back across members,
//! [`timeout::TimeoutSlice`] bounds response time and
//! [`metrics::MeasuredSlice`] records request metrics.
//!
//! Storage is abstracted behind the [`Storage`] trait. Keys are normalized
//! `/`-separated paths ([`Key`]). Built-in backends are the filesystem
//! ([`storage::FileStorage`]), an in-memory map ([`InMemoryStorage`]) and
//! prefixed views of another storage ([`storage::SubStorage`]). Storages are
//! described by [`storage::StorageConfig`] and constructed at most once per
//! distinct configuration by [`StoragesCache`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pkgvault::{Content, InMemoryStorage, Key, Storage};
//!
//! # async fn demo() -> pkgvault::Result<()> {
//! let storage = InMemoryStorage::new();
//! let key = Key::new("org/lib/1.0/lib-1.0.jar");
//! storage.save(&key, Content::from_bytes("jar bytes")).await?;
//!
//! let body = storage.value(&key).await?.into_bytes().await?;
//! assert_eq!(&body[..], b"jar bytes");
//! assert_eq!(storage.list(&Key::new("org/lib")).await?, vec![key]);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! The server is configured from one YAML file, see [`config::VaultConfig`]:
//!
//! ```yaml
//! server:
//!   address: "0.0.0.0:8080"
//! storages:
//!   default:
//!     type: fs
//!     path: /var/lib/pkgvault
//! repositories:
//!   local:
//!     type: file
//!     storage: default
//!   central:
//!     type: file-proxy
//!     remotes:
//!       - url: https://repo1.maven.org/maven2
//!         cache:
//!           storage: default
//!   all:
//!     type: group
//!     members: [local, central]
//! ```
//!
//! Requests are routed by their first path segment, so `GET /all/org/lib.jar`
//! asks the `all` group for `org/lib.jar`.
//!
//! # Error Handling
//!
//! All fallible operations return [`Result`] with [`VaultError`]. Absence is
//! reported as [`VaultError::NotFound`] and checked with
//! [`VaultError::is_not_found`]; the HTTP layer renders errors with
//! [`VaultError::to_http_status`].

pub mod auth;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod files;
pub mod group;
pub mod key;
pub mod metrics;
pub mod proxy;
pub mod proxy_cache;
pub mod remote;
pub mod repositories;
pub mod route;
pub mod server;
pub mod slice;
pub mod storage;
pub mod storages_cache;
pub mod timeout;

// Re-export commonly used types
pub use config::VaultConfig;
pub use content::Content;
pub use error::{Result, VaultError};
pub use key::Key;
pub use metrics::VaultMetrics;
pub use repositories::RepositorySlices;
pub use server::SliceServer;
pub use slice::{Slice, SliceHandle};
pub use storage::{InMemoryStorage, Storage, StorageHandle, ValuePipeline};
pub use storages_cache::StoragesCache;
