//! HTTP origins for proxy repositories

use crate::content::Content;
use crate::error::{Result, VaultError};
use crate::key::Key;
use crate::proxy_cache::{CacheSettings, Remote};
use crate::storage::StorageConfig;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Credentials sent to an origin with HTTP Basic authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub username: String,
    pub password: String,
}

/// Where cached copies of an origin's artifacts are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCache {
    pub storage: StorageConfig,
    pub settings: CacheSettings,
}

/// One origin of a proxy repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub url: Url,
    pub credentials: Option<RemoteCredentials>,
    pub cache: Option<RemoteCache>,
}

impl RemoteEndpoint {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| VaultError::ConfigError(format!("invalid remote url `{}`: {}", url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(VaultError::ConfigError(format!(
                "remote url must be http or https: {}",
                url
            )));
        }
        Ok(Self {
            url,
            credentials: None,
            cache: None,
        })
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(RemoteCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_cache(mut self, cache: RemoteCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Absolute URL of `key` below the endpoint's base URL
    ///
    /// Every key part becomes one path segment under the base path, so a key
    /// can never change the scheme or host the request goes to.
    pub fn url_for(&self, key: &Key) -> Result<Url> {
        if let Some(part) = key.parts().iter().find(|part| *part == "." || *part == "..") {
            return Err(VaultError::InvalidKey(format!("illegal segment `{}` in {}", part, key)));
        }
        let mut url = self.url.clone();
        url.path_segments_mut()
            .map_err(|_| VaultError::ConfigError(format!("remote url {} cannot take a path", self.url)))?
            .pop_if_empty()
            .extend(key.parts());
        Ok(url)
    }
}

/// Remote fetching artifacts with HTTP GET
pub struct HttpRemote {
    client: Client,
    endpoint: RemoteEndpoint,
}

impl HttpRemote {
    pub fn new(endpoint: RemoteEndpoint) -> Result<Self> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: RemoteEndpoint, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VaultError::HttpError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Remote for HttpRemote {
    async fn fetch(&self, key: &Key) -> Result<Content> {
        let url = self.endpoint.url_for(key)?;
        debug!("Fetching {} from origin", url);

        let mut request = self.client.get(url.clone());
        if let Some(credentials) = &self.endpoint.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }
        let response = request.send().await.map_err(|e| {
            warn!("GET {} failed: {}", url, e);
            VaultError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            debug!("Origin answered {} for {}", status, url);
            return Err(VaultError::from_http_status(
                status.as_u16(),
                format!("{} returned {}", url, status),
            ));
        }
        let size = response.content_length();
        let body = response.bytes_stream().map_err(VaultError::from);
        Ok(Content::from_stream(body, size))
    }
}
