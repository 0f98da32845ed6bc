//! Shared in-memory response cache.
//!
//! Both the prefetch engine and the playback side read through the same
//! [`ResponseCache`], so any body the engine has fully downloaded is served
//! to playback without touching the network.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use moka::Expiry;
use moka::future::Cache;
use serde::Serialize;
use tracing::trace;

use crate::config::CacheConfig;

/// What kind of resource a cache entry holds. Drives the entry's TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Playlist,
    Segment,
}

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: Bytes,
    pub kind: ResourceKind,
}

struct KindExpiry {
    playlist_ttl: Duration,
    segment_ttl: Duration,
}

impl Expiry<String, CachedResponse> for KindExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedResponse,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(match value.kind {
            ResourceKind::Playlist => self.playlist_ttl,
            ResourceKind::Segment => self.segment_ttl,
        })
    }
}

/// Point-in-time view of the shared cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size_bytes: u64,
    pub capacity_bytes: u64,
    pub entry_count: u64,
    pub request_count: u64,
    pub hit_count: u64,
    pub network_count: u64,
}

impl CacheStats {
    /// Percentage of requests served from cache.
    pub fn hit_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            (self.hit_count as f64 / self.request_count as f64) * 100.0
        }
    }
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache {:.2}MB / {:.2}MB, {} requests ({} hits, {} network), hit rate {:.1}%",
            mib(self.size_bytes),
            mib(self.capacity_bytes),
            self.request_count,
            self.hit_count,
            self.network_count,
            self.hit_rate()
        )
    }
}

pub struct ResponseCache {
    entries: Cache<String, CachedResponse>,
    capacity_bytes: u64,
    requests: AtomicU64,
    hits: AtomicU64,
    network: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_capacity_bytes)
            .weigher(|_key: &String, value: &CachedResponse| -> u32 {
                u32::try_from(value.body.len()).unwrap_or(u32::MAX)
            })
            .expire_after(KindExpiry {
                playlist_ttl: config.playlist_ttl,
                segment_ttl: config.segment_ttl,
            })
            .build();

        Self {
            entries,
            capacity_bytes: config.max_capacity_bytes,
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            network: AtomicU64::new(0),
        }
    }

    /// Looks up `url`, counting the request as a hit or a network fetch.
    pub async fn lookup(&self, url: &str) -> Option<Bytes> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        match self.entries.get(url).await {
            Some(cached) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(url, bytes = cached.body.len(), "Response cache hit");
                Some(cached.body)
            }
            None => {
                self.network.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores a fully read response body.
    pub async fn store(&self, url: &str, body: Bytes, kind: ResourceKind) {
        self.entries
            .insert(url.to_owned(), CachedResponse { body, kind })
            .await;
    }

    /// Whether `url` is cached, without touching the counters.
    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub async fn stats(&self) -> CacheStats {
        // Settle pending weight bookkeeping so the size is exact.
        self.entries.run_pending_tasks().await;
        CacheStats {
            size_bytes: self.entries.weighted_size(),
            capacity_bytes: self.capacity_bytes,
            entry_count: self.entries.entry_count(),
            request_count: self.requests.load(Ordering::Relaxed),
            hit_count: self.hits.load(Ordering::Relaxed),
            network_count: self.network.load(Ordering::Relaxed),
        }
    }

    /// Evicts every entry. Counters are kept.
    pub async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }
}
