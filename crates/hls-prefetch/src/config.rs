use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::PrefetchError;
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = concat!("hls-prefetch/", env!("CARGO_PKG_VERSION"));

/// HTTP client settings shared by playlist and segment requests.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Overall timeout for a single request. Zero leaves it unset.
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,

    /// Duration to keep idle connections alive before closing
    pub pool_idle_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HttpConfig::default_headers(),
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl HttpConfig {
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "application/vnd.apple.mpegurl,application/x-mpegurl,video/*;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        headers
    }
}

/// Shared response cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on cached body bytes
    pub max_capacity_bytes: u64,
    /// Time-to-live for media segments
    pub segment_ttl: Duration,
    /// Time-to-live for playlist documents
    pub playlist_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity_bytes: 50 * 1024 * 1024, // 50 MiB
            segment_ttl: Duration::from_secs(60 * 60),
            playlist_ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Simultaneous in-flight segment fetches per prefetch request
    pub segment_concurrency: usize,
    /// Buffered events per subscriber before lagging receivers drop messages
    pub event_capacity: usize,
    /// Per-segment retry policy. The default performs no retries.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            segment_concurrency: 3,
            event_capacity: 256,
            retry: RetryPolicy::default(),
        }
    }
}

/// Feed windowing policy.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Segments warmed for every playlist inside the window
    pub initial_segment_count: usize,
    /// Radius of the window around the active index
    pub prefetch_window: usize,
    /// Segments warmed once the user has dwelt on a playlist
    pub extended_segment_count: usize,
    /// How long a playlist must stay active before the dwell signal fires
    pub dwell_threshold: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            initial_segment_count: 2,
            prefetch_window: 1,
            extended_segment_count: 50,
            dwell_threshold: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrefetchConfig {
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub engine: EngineConfig,
    pub feed: FeedConfig,
}

impl PrefetchConfig {
    pub fn builder() -> PrefetchConfigBuilder {
        PrefetchConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), PrefetchError> {
        if self.engine.segment_concurrency == 0 {
            return Err(PrefetchError::configuration(
                "segment concurrency must be at least 1",
            ));
        }
        if self.engine.event_capacity == 0 {
            return Err(PrefetchError::configuration(
                "event capacity must be at least 1",
            ));
        }
        if self.cache.max_capacity_bytes == 0 {
            return Err(PrefetchError::configuration(
                "cache capacity must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Builder for [`PrefetchConfig`].
#[derive(Debug, Default)]
pub struct PrefetchConfigBuilder {
    config: PrefetchConfig,
}

impl PrefetchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.read_timeout = timeout;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.http.user_agent = user_agent.into();
        self
    }

    /// Adds a default header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.config.http.headers.insert(name, value);
        }
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.http.follow_redirects = follow;
        self
    }

    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.config.cache.max_capacity_bytes = bytes;
        self
    }

    pub fn with_segment_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.segment_ttl = ttl;
        self
    }

    pub fn with_playlist_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.playlist_ttl = ttl;
        self
    }

    pub fn with_segment_concurrency(mut self, concurrency: usize) -> Self {
        self.config.engine.segment_concurrency = concurrency;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.engine.event_capacity = capacity;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.engine.retry = retry;
        self
    }

    pub fn with_initial_segment_count(mut self, count: usize) -> Self {
        self.config.feed.initial_segment_count = count;
        self
    }

    pub fn with_prefetch_window(mut self, radius: usize) -> Self {
        self.config.feed.prefetch_window = radius;
        self
    }

    pub fn with_extended_segment_count(mut self, count: usize) -> Self {
        self.config.feed.extended_segment_count = count;
        self
    }

    pub fn with_dwell_threshold(mut self, threshold: Duration) -> Self {
        self.config.feed.dwell_threshold = threshold;
        self
    }

    pub fn build(self) -> PrefetchConfig {
        self.config
    }
}
