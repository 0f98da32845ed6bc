// HTTP fetch capability backed by the shared response cache.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, trace};
use url::Url;

use crate::cache::{CacheStats, ResourceKind, ResponseCache};
use crate::config::{CacheConfig, HttpConfig};
use crate::error::PrefetchError;

/// "HTTP fetch + shared response cache" as a single capability.
///
/// Implementations must only report success once the full body has been read,
/// and must make that body available to later callers through their cache.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch(&self, url: &Url, kind: ResourceKind) -> Result<Bytes, PrefetchError>;

    async fn cache_stats(&self) -> Result<CacheStats, PrefetchError>;

    async fn clear_cache(&self) -> Result<(), PrefetchError>;
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &HttpConfig) -> Result<Client, PrefetchError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(config.pool_idle_timeout)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    client_builder.build().map_err(|e| PrefetchError::Network {
        source: Arc::new(e),
    })
}

/// reqwest client in front of a [`ResponseCache`].
///
/// Cheap to clone; clones share both the connection pool and the cache.
#[derive(Clone)]
pub struct CachingClient {
    http_client: Client,
    cache: Arc<ResponseCache>,
}

impl CachingClient {
    pub fn new(http_config: &HttpConfig, cache_config: &CacheConfig) -> Result<Self, PrefetchError> {
        Ok(Self::with_client(
            create_client(http_config)?,
            Arc::new(ResponseCache::new(cache_config)),
        ))
    }

    pub fn with_client(http_client: Client, cache: Arc<ResponseCache>) -> Self {
        Self { http_client, cache }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    async fn fetch_from_network(&self, url: &Url) -> Result<Bytes, PrefetchError> {
        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| PrefetchError::from_reqwest(e, url.as_str()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PrefetchError::fetch(status, url.as_str()));
        }

        // Only a completely read body counts as cached.
        response
            .bytes()
            .await
            .map_err(|e| PrefetchError::from_reqwest(e, url.as_str()))
    }
}

#[async_trait]
impl HttpFetch for CachingClient {
    async fn fetch(&self, url: &Url, kind: ResourceKind) -> Result<Bytes, PrefetchError> {
        if let Some(body) = self.cache.lookup(url.as_str()).await {
            return Ok(body);
        }

        let body = self.fetch_from_network(url).await?;
        trace!(url = %url, bytes = body.len(), ?kind, "Fetched from network");
        self.cache.store(url.as_str(), body.clone(), kind).await;
        Ok(body)
    }

    async fn cache_stats(&self) -> Result<CacheStats, PrefetchError> {
        Ok(self.cache.stats().await)
    }

    async fn clear_cache(&self) -> Result<(), PrefetchError> {
        self.cache.clear().await;
        debug!("Response cache cleared");
        Ok(())
    }
}
