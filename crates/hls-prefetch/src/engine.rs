// Segment Prefetch Engine: warms the shared cache with the first N segments of a playlist.
//
// At most one request per playlist URI is active. Starting a new one cancels the
// previous request, and every event or counter update is published under the same
// lock that decides which request is active, so a superseded request can never
// leak progress after its successor has started.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, ResourceKind};
use crate::client::{CachingClient, HttpFetch};
use crate::config::{EngineConfig, PrefetchConfig};
use crate::error::PrefetchError;
use crate::events::{PrefetchEvent, PrefetchFailure, PrefetchResult, ProgressEvent};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::playlist::{PlaylistResolver, SegmentRef};
use crate::retry::retry_with_backoff;

/// The prefetch operations the feed orchestrator depends on.
#[async_trait]
pub trait SegmentPrefetch: Send + Sync {
    async fn prefetch(
        &self,
        playlist_uri: &str,
        segment_count: usize,
    ) -> Result<PrefetchResult, PrefetchError>;

    fn cancel(&self, playlist_uri: &str);

    async fn cache_stats(&self) -> Result<CacheStats, PrefetchError>;
}

#[derive(Debug, Clone)]
pub struct PrefetchRequest {
    pub playlist_uri: String,
    pub segment_count: usize,
    pub requested_at: Instant,
}

struct ActiveRequest {
    id: u64,
    token: CancellationToken,
    request: PrefetchRequest,
}

pub struct PrefetchEngine {
    fetcher: Arc<dyn HttpFetch>,
    resolver: PlaylistResolver,
    config: EngineConfig,
    active: Mutex<HashMap<String, ActiveRequest>>,
    next_id: AtomicU64,
    events: broadcast::Sender<PrefetchEvent>,
    metrics: EngineMetrics,
}

/// Drops the active entry if the owning `prefetch` future goes away early.
struct ActiveGuard<'a> {
    engine: &'a PrefetchEngine,
    playlist_uri: &'a str,
    id: u64,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.engine.active.lock();
        if active
            .get(self.playlist_uri)
            .is_some_and(|entry| entry.id == self.id)
            && let Some(entry) = active.remove(self.playlist_uri)
        {
            entry.token.cancel();
        }
    }
}

impl PrefetchEngine {
    pub fn new(fetcher: Arc<dyn HttpFetch>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            resolver: PlaylistResolver::new(Arc::clone(&fetcher)),
            fetcher,
            config,
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            events,
            metrics: EngineMetrics::new(),
        }
    }

    /// Builds an engine over a fresh [`CachingClient`].
    pub fn from_config(config: &PrefetchConfig) -> Result<Self, PrefetchError> {
        config.validate()?;
        let client = CachingClient::new(&config.http, &config.cache)?;
        Ok(Self::new(Arc::new(client), config.engine.clone()))
    }

    /// The shared fetch capability. Playback should read through this.
    pub fn fetcher(&self) -> Arc<dyn HttpFetch> {
        Arc::clone(&self.fetcher)
    }

    /// Subscribes to progress, completion and error events.
    pub fn subscribe(&self) -> broadcast::Receiver<PrefetchEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn log_metrics(&self) {
        self.metrics.log_summary();
    }

    /// Requests currently in flight, oldest first.
    pub fn active_requests(&self) -> Vec<PrefetchRequest> {
        let mut requests: Vec<PrefetchRequest> = self
            .active
            .lock()
            .values()
            .map(|entry| entry.request.clone())
            .collect();
        requests.sort_by_key(|request| request.requested_at);
        requests
    }

    pub fn is_active(&self, playlist_uri: &str) -> bool {
        self.active.lock().contains_key(playlist_uri)
    }

    /// Resolves `playlist_uri` and fetches its first `segment_count` segments.
    ///
    /// Any in-flight request for the same URI is cancelled first. Segment failures
    /// are reported as progress events and do not fail the request; only a playlist
    /// failure does. A superseded or cancelled request resolves to
    /// [`PrefetchError::Cancelled`].
    #[instrument(skip(self))]
    pub async fn prefetch(
        &self,
        playlist_uri: &str,
        segment_count: usize,
    ) -> Result<PrefetchResult, PrefetchError> {
        let (id, token) = self.begin(playlist_uri, segment_count);
        let _guard = ActiveGuard {
            engine: self,
            playlist_uri,
            id,
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(PrefetchError::Cancelled),
            result = self.run(playlist_uri, segment_count, id, &token) => result,
        };

        match outcome {
            Ok(result) => {
                let event = PrefetchEvent::Complete(result.clone());
                if !self.finish(playlist_uri, id, event, EngineMetrics::record_request_completed) {
                    return Err(PrefetchError::Cancelled);
                }
                info!(
                    prefetched = result.prefetched_segments,
                    total = result.total_segments,
                    "Prefetch completed"
                );
                Ok(result)
            }
            Err(PrefetchError::Cancelled) => {
                debug!("Prefetch cancelled");
                Err(PrefetchError::Cancelled)
            }
            Err(err) => {
                let event = PrefetchEvent::Error(PrefetchFailure {
                    uri: playlist_uri.to_owned(),
                    code: err.code(),
                    error_detail: err.to_string(),
                });
                if !self.finish(playlist_uri, id, event, EngineMetrics::record_request_failed) {
                    return Err(PrefetchError::Cancelled);
                }
                warn!(error = %err, "Prefetch failed");
                Err(err)
            }
        }
    }

    /// Cancels the in-flight request for `playlist_uri`, if any.
    pub fn cancel(&self, playlist_uri: &str) {
        if let Some(entry) = self.active.lock().remove(playlist_uri) {
            entry.token.cancel();
            self.metrics.record_request_cancelled();
            debug!(playlist_uri, "Cancelled prefetch");
        }
    }

    pub fn cancel_all(&self) {
        let mut active = self.active.lock();
        let cancelled = active.len();
        for (_, entry) in active.drain() {
            entry.token.cancel();
            self.metrics.record_request_cancelled();
        }
        if cancelled > 0 {
            debug!(cancelled, "Cancelled all prefetches");
        }
    }

    /// Evicts the shared cache. Failures are logged and swallowed.
    pub async fn clear_cache(&self) {
        if let Err(e) = self.fetcher.clear_cache().await {
            warn!(error = %e, "Failed to clear response cache");
        }
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, PrefetchError> {
        self.fetcher.cache_stats().await
    }

    fn begin(&self, playlist_uri: &str, segment_count: usize) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let request = PrefetchRequest {
            playlist_uri: playlist_uri.to_owned(),
            segment_count,
            requested_at: Instant::now(),
        };

        let mut active = self.active.lock();
        if let Some(previous) = active.insert(
            playlist_uri.to_owned(),
            ActiveRequest {
                id,
                token: token.clone(),
                request,
            },
        ) {
            previous.token.cancel();
            self.metrics.record_request_cancelled();
            debug!(
                playlist_uri,
                previous_count = previous.request.segment_count,
                segment_count,
                "Superseding in-flight prefetch"
            );
        }
        self.metrics.record_request_started();

        (id, token)
    }

    async fn run(
        &self,
        playlist_uri: &str,
        segment_count: usize,
        id: u64,
        token: &CancellationToken,
    ) -> Result<PrefetchResult, PrefetchError> {
        let document = self.resolver.resolve(playlist_uri).await?;
        let total_segments = document.len();
        // Segments are moved into their futures; a borrowed slice makes the
        // `prefetch` future non-`Send`.
        let selected: Vec<SegmentRef> = document
            .segments
            .into_iter()
            .take(segment_count)
            .collect();

        let prefetched_segments = if selected.is_empty() {
            0
        } else {
            futures::stream::iter(selected)
                .map(|segment| self.prefetch_segment(playlist_uri, id, token, segment))
                .buffer_unordered(self.config.segment_concurrency.max(1))
                .filter(|fetched| futures::future::ready(*fetched))
                .count()
                .await
        };

        Ok(PrefetchResult {
            playlist_uri: playlist_uri.to_owned(),
            total_segments,
            prefetched_segments,
            success: true,
        })
    }

    /// Fetches one segment and reports it. Returns whether the fetch succeeded.
    async fn prefetch_segment(
        &self,
        playlist_uri: &str,
        id: u64,
        token: &CancellationToken,
        segment: SegmentRef,
    ) -> bool {
        let url = &segment.uri;
        let fetcher = &self.fetcher;
        let outcome = retry_with_backoff(&self.config.retry, token, move |_| {
            fetcher.fetch(url, ResourceKind::Segment)
        })
        .await;

        if matches!(outcome, Err(PrefetchError::Cancelled)) {
            return false;
        }

        let (success, error_detail, bytes) = match &outcome {
            Ok(body) => (true, None, body.len() as u64),
            Err(err) => (false, Some(err.to_string()), 0),
        };
        debug!(
            segment_index = segment.sequence_index,
            segment_uri = %url,
            success,
            error = error_detail.as_deref(),
            "Segment prefetch settled"
        );

        let event = PrefetchEvent::Progress(ProgressEvent {
            playlist_uri: playlist_uri.to_owned(),
            segment_uri: url.to_string(),
            segment_index: segment.sequence_index,
            success,
            error_detail,
        });
        let published = self.publish(playlist_uri, id, event, |metrics| {
            if success {
                metrics.record_segment_fetched(bytes);
            } else {
                metrics.record_segment_failed();
            }
        });

        published && success
    }

    /// Sends `event` and applies `record` only while request `id` is still the active one.
    fn publish(
        &self,
        playlist_uri: &str,
        id: u64,
        event: PrefetchEvent,
        record: impl FnOnce(&EngineMetrics),
    ) -> bool {
        let active = self.active.lock();
        let current = active
            .get(playlist_uri)
            .is_some_and(|entry| entry.id == id && !entry.token.is_cancelled());
        if !current {
            return false;
        }
        record(&self.metrics);
        // No subscribers is fine; events are best-effort telemetry.
        let _ = self.events.send(event);
        true
    }

    /// Publishes the terminal event and retires request `id`.
    fn finish(
        &self,
        playlist_uri: &str,
        id: u64,
        event: PrefetchEvent,
        record: impl FnOnce(&EngineMetrics),
    ) -> bool {
        let mut active = self.active.lock();
        let current = active
            .get(playlist_uri)
            .is_some_and(|entry| entry.id == id && !entry.token.is_cancelled());
        if !current {
            return false;
        }
        active.remove(playlist_uri);
        record(&self.metrics);
        let _ = self.events.send(event);
        true
    }
}

#[async_trait]
impl SegmentPrefetch for PrefetchEngine {
    async fn prefetch(
        &self,
        playlist_uri: &str,
        segment_count: usize,
    ) -> Result<PrefetchResult, PrefetchError> {
        PrefetchEngine::prefetch(self, playlist_uri, segment_count).await
    }

    fn cancel(&self, playlist_uri: &str) {
        PrefetchEngine::cancel(self, playlist_uri);
    }

    async fn cache_stats(&self) -> Result<CacheStats, PrefetchError> {
        PrefetchEngine::cache_stats(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;
    use url::Url;

    const PLAYLIST_URI: &str = "https://cdn.example.com/videos/1/index.m3u8";

    #[derive(Clone)]
    enum Reply {
        Body(Bytes),
        Status(StatusCode),
        /// Fails with the first status, then serves the body.
        FlakyOnce(StatusCode, Bytes),
        Hang,
    }

    #[derive(Default)]
    struct MockFetcher {
        replies: Mutex<HashMap<String, Reply>>,
        attempts: Mutex<HashMap<String, usize>>,
        segment_delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        segment_started: Notify,
        fail_clear: bool,
    }

    impl MockFetcher {
        fn with_playlist(segments: usize) -> Self {
            let mock = Self::default();
            let mut body = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:4\n");
            for i in 0..segments {
                body.push_str(&format!("#EXTINF:4.0,\nseg{i}.ts\n"));
                mock.reply(&segment_uri(i), Reply::Body(Bytes::from(vec![0u8; 188])));
            }
            body.push_str("#EXT-X-ENDLIST\n");
            mock.reply(PLAYLIST_URI, Reply::Body(Bytes::from(body)));
            mock
        }

        fn reply(&self, url: &str, reply: Reply) {
            self.replies.lock().insert(url.to_owned(), reply);
        }

        fn attempts(&self, url: &str) -> usize {
            self.attempts.lock().get(url).copied().unwrap_or(0)
        }

        fn segment_attempts(&self) -> usize {
            self.attempts
                .lock()
                .iter()
                .filter(|(url, _)| url.ends_with(".ts"))
                .map(|(_, count)| count)
                .sum()
        }
    }

    fn segment_uri(index: usize) -> String {
        format!("https://cdn.example.com/videos/1/seg{index}.ts")
    }

    #[async_trait]
    impl HttpFetch for MockFetcher {
        async fn fetch(&self, url: &Url, kind: ResourceKind) -> Result<Bytes, PrefetchError> {
            let attempt = {
                let mut attempts = self.attempts.lock();
                let count = attempts.entry(url.to_string()).or_default();
                *count += 1;
                *count
            };
            let reply = self.replies.lock().get(url.as_str()).cloned();

            if kind == ResourceKind::Segment {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                self.segment_started.notify_one();
                if let Some(delay) = self.segment_delay {
                    tokio::time::sleep(delay).await;
                }
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }

            match reply {
                Some(Reply::Body(body)) => Ok(body),
                Some(Reply::Status(status)) => Err(PrefetchError::fetch(status, url.as_str())),
                Some(Reply::FlakyOnce(status, body)) => {
                    if attempt == 1 {
                        Err(PrefetchError::fetch(status, url.as_str()))
                    } else {
                        Ok(body)
                    }
                }
                Some(Reply::Hang) => std::future::pending().await,
                None => Err(PrefetchError::fetch(StatusCode::NOT_FOUND, url.as_str())),
            }
        }

        async fn cache_stats(&self) -> Result<CacheStats, PrefetchError> {
            Ok(CacheStats {
                capacity_bytes: 1024,
                ..CacheStats::default()
            })
        }

        async fn clear_cache(&self) -> Result<(), PrefetchError> {
            if self.fail_clear {
                Err(PrefetchError::cache("disk cache unavailable"))
            } else {
                Ok(())
            }
        }
    }

    fn engine_with(mock: MockFetcher, config: EngineConfig) -> (Arc<PrefetchEngine>, Arc<MockFetcher>) {
        let mock = Arc::new(mock);
        let engine = Arc::new(PrefetchEngine::new(mock.clone(), config));
        (engine, mock)
    }

    fn drain(rx: &mut broadcast::Receiver<PrefetchEvent>) -> Vec<PrefetchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn progress(events: &[PrefetchEvent]) -> Vec<&ProgressEvent> {
        events
            .iter()
            .filter_map(|event| match event {
                PrefetchEvent::Progress(progress) => Some(progress),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn fetches_exactly_the_requested_prefix() {
        let (engine, mock) = engine_with(MockFetcher::with_playlist(8), EngineConfig::default());
        let mut rx = engine.subscribe();

        let result = engine.prefetch(PLAYLIST_URI, 2).await.unwrap();

        assert_eq!(
            result,
            PrefetchResult {
                playlist_uri: PLAYLIST_URI.to_owned(),
                total_segments: 8,
                prefetched_segments: 2,
                success: true,
            }
        );
        assert_eq!(mock.segment_attempts(), 2);
        assert_eq!(mock.attempts(&segment_uri(0)), 1);
        assert_eq!(mock.attempts(&segment_uri(1)), 1);
        assert_eq!(mock.attempts(&segment_uri(2)), 0);

        let events = drain(&mut rx);
        let mut indices: Vec<usize> = progress(&events).iter().map(|p| p.segment_index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1]);
        assert!(matches!(events.last(), Some(PrefetchEvent::Complete(r)) if r == &result));
        assert!(!engine.is_active(PLAYLIST_URI));
    }

    #[tokio::test]
    async fn count_larger_than_playlist_takes_everything() {
        let (engine, mock) = engine_with(MockFetcher::with_playlist(3), EngineConfig::default());

        let result = engine.prefetch(PLAYLIST_URI, 50).await.unwrap();

        assert_eq!(result.total_segments, 3);
        assert_eq!(result.prefetched_segments, 3);
        assert_eq!(mock.segment_attempts(), 3);
    }

    #[tokio::test]
    async fn zero_count_and_empty_playlists_succeed_immediately() {
        let (engine, mock) = engine_with(MockFetcher::with_playlist(4), EngineConfig::default());
        let result = engine.prefetch(PLAYLIST_URI, 0).await.unwrap();
        assert!(result.success);
        assert_eq!(result.prefetched_segments, 0);
        assert_eq!(result.total_segments, 4);
        assert_eq!(mock.segment_attempts(), 0);

        let (engine, mock) = engine_with(MockFetcher::with_playlist(0), EngineConfig::default());
        let result = engine.prefetch(PLAYLIST_URI, 5).await.unwrap();
        assert!(result.success);
        assert_eq!(result.total_segments, 0);
        assert_eq!(result.prefetched_segments, 0);
        assert_eq!(mock.segment_attempts(), 0);
    }

    #[tokio::test]
    async fn segment_failures_do_not_fail_the_request() {
        let mock = MockFetcher::with_playlist(4);
        mock.reply(&segment_uri(1), Reply::Status(StatusCode::NOT_FOUND));
        mock.reply(&segment_uri(3), Reply::Status(StatusCode::INTERNAL_SERVER_ERROR));
        let (engine, _mock) = engine_with(mock, EngineConfig::default());
        let mut rx = engine.subscribe();

        let result = engine.prefetch(PLAYLIST_URI, 4).await.unwrap();

        assert!(result.success);
        assert_eq!(result.prefetched_segments, 2);

        let events = drain(&mut rx);
        let progress = progress(&events);
        assert_eq!(progress.len(), 4);
        let failed: Vec<_> = progress.iter().filter(|p| !p.success).collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|p| p.error_detail.is_some()));

        let metrics = engine.metrics();
        assert_eq!(metrics.segments_fetched, 2);
        assert_eq!(metrics.segments_failed, 2);
        assert_eq!(metrics.segment_bytes, 2 * 188);
        assert_eq!(metrics.requests_completed, 1);
    }

    #[tokio::test]
    async fn playlist_failure_fails_the_request_and_emits_error() {
        let mock = MockFetcher::default();
        mock.reply(PLAYLIST_URI, Reply::Status(StatusCode::FORBIDDEN));
        let (engine, mock) = engine_with(mock, EngineConfig::default());
        let mut rx = engine.subscribe();

        let err = engine.prefetch(PLAYLIST_URI, 2).await.unwrap_err();

        assert!(matches!(
            err,
            PrefetchError::Fetch {
                status: StatusCode::FORBIDDEN,
                ..
            }
        ));
        assert_eq!(mock.segment_attempts(), 0);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            PrefetchEvent::Error(failure) => {
                assert_eq!(failure.uri, PLAYLIST_URI);
                assert_eq!(failure.code, "FETCH_ERROR");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(engine.metrics().requests_failed, 1);
    }

    #[tokio::test]
    async fn empty_playlist_body_is_fatal() {
        let mock = MockFetcher::default();
        mock.reply(PLAYLIST_URI, Reply::Body(Bytes::new()));
        let (engine, _mock) = engine_with(mock, EngineConfig::default());

        let err = engine.prefetch(PLAYLIST_URI, 2).await.unwrap_err();
        assert!(matches!(err, PrefetchError::EmptyDocument { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn segment_fetches_respect_the_concurrency_bound() {
        let mock = MockFetcher {
            segment_delay: Some(Duration::from_millis(50)),
            ..MockFetcher::with_playlist(10)
        };
        let config = EngineConfig {
            segment_concurrency: 2,
            ..EngineConfig::default()
        };
        let (engine, mock) = engine_with(mock, config);

        let result = engine.prefetch(PLAYLIST_URI, 10).await.unwrap();

        assert_eq!(result.prefetched_segments, 10);
        assert_eq!(mock.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn new_request_supersedes_the_previous_one() {
        let mock = MockFetcher::with_playlist(4);
        for i in 0..4 {
            mock.reply(&segment_uri(i), Reply::Hang);
        }
        let (engine, mock) = engine_with(mock, EngineConfig::default());

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.prefetch(PLAYLIST_URI, 4).await })
        };
        mock.segment_started.notified().await;

        let mut rx = engine.subscribe();
        mock.reply(&segment_uri(0), Reply::Body(Bytes::from_static(b"fresh")));
        let second = engine.prefetch(PLAYLIST_URI, 1).await.unwrap();

        assert!(matches!(first.await.unwrap(), Err(PrefetchError::Cancelled)));
        assert_eq!(second.prefetched_segments, 1);

        let events = drain(&mut rx);
        let progress = progress(&events);
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].segment_index, 0);
        assert!(progress[0].success);
        assert_eq!(events.len(), 2);

        let metrics = engine.metrics();
        assert_eq!(metrics.requests_started, 2);
        assert_eq!(metrics.requests_cancelled, 1);
        assert_eq!(metrics.requests_completed, 1);
        assert!(!engine.is_active(PLAYLIST_URI));
    }

    #[tokio::test]
    async fn cancel_aborts_in_flight_work_silently() {
        let mock = MockFetcher::with_playlist(2);
        mock.reply(&segment_uri(0), Reply::Hang);
        mock.reply(&segment_uri(1), Reply::Hang);
        let (engine, mock) = engine_with(mock, EngineConfig::default());
        let mut rx = engine.subscribe();

        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.prefetch(PLAYLIST_URI, 2).await })
        };
        mock.segment_started.notified().await;
        assert!(engine.is_active(PLAYLIST_URI));
        assert_eq!(engine.active_requests()[0].segment_count, 2);

        engine.cancel(PLAYLIST_URI);
        engine.cancel(PLAYLIST_URI);
        engine.cancel("https://cdn.example.com/unknown.m3u8");

        assert!(matches!(task.await.unwrap(), Err(PrefetchError::Cancelled)));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(engine.metrics().requests_cancelled, 1);
    }

    #[tokio::test]
    async fn cancel_all_clears_every_request() {
        let mock = MockFetcher::with_playlist(1);
        mock.reply(&segment_uri(0), Reply::Hang);
        let (engine, mock) = engine_with(mock, EngineConfig::default());

        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.prefetch(PLAYLIST_URI, 1).await })
        };
        mock.segment_started.notified().await;

        engine.cancel_all();

        assert!(engine.active_requests().is_empty());
        assert!(matches!(task.await.unwrap(), Err(PrefetchError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_policy_recovers_transient_segment_errors() {
        let mock = MockFetcher::with_playlist(2);
        mock.reply(
            &segment_uri(0),
            Reply::FlakyOnce(StatusCode::SERVICE_UNAVAILABLE, Bytes::from_static(b"ok")),
        );
        let config = EngineConfig {
            retry: RetryPolicy::with_retries(2),
            ..EngineConfig::default()
        };
        let (engine, mock) = engine_with(mock, config);
        let mut rx = engine.subscribe();

        let result = engine.prefetch(PLAYLIST_URI, 2).await.unwrap();

        assert_eq!(result.prefetched_segments, 2);
        assert_eq!(mock.attempts(&segment_uri(0)), 2);
        assert_eq!(progress(&drain(&mut rx)).len(), 2);
    }

    #[tokio::test]
    async fn clear_cache_swallows_failures() {
        let mock = MockFetcher {
            fail_clear: true,
            ..MockFetcher::default()
        };
        let (engine, _mock) = engine_with(mock, EngineConfig::default());

        engine.clear_cache().await;

        let stats = engine.cache_stats().await.unwrap();
        assert_eq!(stats.capacity_bytes, 1024);
    }

    #[test]
    fn from_config_validates() {
        let config = PrefetchConfig::builder().with_segment_concurrency(0).build();
        assert!(PrefetchEngine::from_config(&config).is_err());
    }
}
