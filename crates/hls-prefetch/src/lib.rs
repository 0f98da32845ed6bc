//! HLS prefetch: warms an HTTP cache with the leading segments of media playlists
//! so that playback of a scrolling video feed starts without waiting on the network.
//!
//! ## Core Types
//!
//! - [`CachingClient`] - HTTP client backed by a byte-bounded response cache
//! - [`PlaylistResolver`] - Fetches a playlist and extracts its segment references
//! - [`PrefetchEngine`] - Fetches a bounded prefix of segments per playlist, with
//!   per-playlist supersession and cancellation
//!
//! ## Feed
//!
//! - [`FeedPrefetcher`] - Sliding-window prefetch around the active feed item,
//!   plus a one-time extended prefetch once the user dwells on an item
//! - [`DwellTimer`] - Fires the sustained-view signal after the dwell threshold
//!
//! ## Observability
//!
//! - [`PrefetchEvent`] - Progress, completion and failure events, via
//!   [`PrefetchEngine::subscribe`]
//! - [`CacheStats`] - Cache occupancy and hit-rate snapshot
//! - [`MetricsSnapshot`] - Engine-wide request and segment counters

pub mod cache;
pub mod client;
pub mod config;
pub mod dwell;
pub mod engine;
pub mod error;
pub mod events;
pub mod feed;
pub mod metrics;
pub mod playlist;
pub mod retry;

pub use cache::{CacheStats, ResourceKind, ResponseCache};
pub use client::{CachingClient, HttpFetch, create_client};
pub use config::{
    CacheConfig, EngineConfig, FeedConfig, HttpConfig, PrefetchConfig, PrefetchConfigBuilder,
};
pub use dwell::{DwellListener, DwellTimer};
pub use engine::{PrefetchEngine, PrefetchRequest, SegmentPrefetch};
pub use error::PrefetchError;
pub use events::{PrefetchEvent, PrefetchFailure, PrefetchResult, ProgressEvent};
pub use feed::{DedupState, FeedPrefetcher, PrefetchStage};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use playlist::{PlaylistDocument, PlaylistResolver, SegmentRef, parse_segment_refs};
pub use retry::RetryPolicy;
