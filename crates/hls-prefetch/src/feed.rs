// Feed Prefetch Orchestrator: decides which playlists to warm as the feed moves.
//
// Every URI moves through Untouched -> BasicPrefetched -> DeepPrefetched and never
// back. A URI is claimed before its prefetch is dispatched, so repeated or rapid
// window scans cannot dispatch it twice, and it is settled once the attempt
// resolves whatever the outcome.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::dwell::{DwellListener, DwellTimer};
use crate::engine::SegmentPrefetch;
use crate::error::PrefetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchStage {
    Untouched,
    BasicPrefetched,
    DeepPrefetched,
}

/// Membership sets for one feed session.
///
/// `*_pending` holds URIs whose attempt has been dispatched but not resolved;
/// `*_prefetched` holds URIs whose attempt has resolved, successfully or not.
#[derive(Debug, Clone, Default)]
pub struct DedupState {
    basic_pending: HashSet<String>,
    basic_prefetched: HashSet<String>,
    deep_pending: HashSet<String>,
    deep_prefetched: HashSet<String>,
}

impl DedupState {
    pub fn is_basic_prefetched(&self, uri: &str) -> bool {
        self.basic_prefetched.contains(uri)
    }

    pub fn is_deep_prefetched(&self, uri: &str) -> bool {
        self.deep_prefetched.contains(uri)
    }

    pub fn stage(&self, uri: &str) -> PrefetchStage {
        if self.deep_prefetched.contains(uri) {
            PrefetchStage::DeepPrefetched
        } else if self.basic_prefetched.contains(uri) {
            PrefetchStage::BasicPrefetched
        } else {
            PrefetchStage::Untouched
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.basic_pending
            .iter()
            .chain(self.deep_pending.iter())
            .map(String::as_str)
    }

    /// Claims `uri` for an initial prefetch. A deep attempt already covers it.
    fn claim_basic(&mut self, uri: &str) -> bool {
        if self.basic_pending.contains(uri)
            || self.basic_prefetched.contains(uri)
            || self.deep_pending.contains(uri)
            || self.deep_prefetched.contains(uri)
        {
            return false;
        }
        self.basic_pending.insert(uri.to_owned());
        true
    }

    fn settle_basic(&mut self, uri: &str) {
        self.basic_pending.remove(uri);
        self.basic_prefetched.insert(uri.to_owned());
    }

    fn claim_deep(&mut self, uri: &str) -> bool {
        if self.deep_pending.contains(uri) || self.deep_prefetched.contains(uri) {
            return false;
        }
        self.deep_pending.insert(uri.to_owned());
        true
    }

    fn settle_deep(&mut self, uri: &str) {
        self.deep_pending.remove(uri);
        self.deep_prefetched.insert(uri.to_owned());
    }
}

/// Indices within `radius` of `center`, clipped to `0..len`.
fn window(center: usize, radius: usize, len: usize) -> Option<RangeInclusive<usize>> {
    if len == 0 {
        return None;
    }
    let start = center.saturating_sub(radius);
    let end = center.saturating_add(radius).min(len - 1);
    (start <= end).then_some(start..=end)
}

/// One feed session's prefetch policy.
///
/// Notifications are fire-and-forget and may come from any thread: each
/// dispatched prefetch runs as its own task on the runtime captured at
/// construction.
pub struct FeedPrefetcher {
    engine: Arc<dyn SegmentPrefetch>,
    config: FeedConfig,
    playlists: RwLock<Vec<String>>,
    state: Arc<Mutex<DedupState>>,
    tasks: TaskTracker,
    session: CancellationToken,
    runtime: Handle,
}

impl FeedPrefetcher {
    /// Creates a session bound to the current tokio runtime.
    ///
    /// Fails with [`PrefetchError::Configuration`] outside a runtime context;
    /// use [`FeedPrefetcher::with_handle`] there.
    pub fn new(
        engine: Arc<dyn SegmentPrefetch>,
        playlists: Vec<String>,
        config: FeedConfig,
    ) -> Result<Self, PrefetchError> {
        let runtime = Handle::try_current().map_err(|e| {
            PrefetchError::configuration(format!("feed prefetcher needs a tokio runtime: {e}"))
        })?;
        Ok(Self::with_handle(engine, playlists, config, runtime))
    }

    pub fn with_handle(
        engine: Arc<dyn SegmentPrefetch>,
        playlists: Vec<String>,
        config: FeedConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            engine,
            config,
            playlists: RwLock::new(playlists),
            state: Arc::new(Mutex::new(DedupState::default())),
            tasks: TaskTracker::new(),
            session: CancellationToken::new(),
            runtime,
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// A dwell timer that reports to this session after `config.dwell_threshold`.
    pub fn dwell_timer(self: &Arc<Self>) -> DwellTimer {
        DwellTimer::with_handle(
            Arc::clone(self) as Arc<dyn DwellListener>,
            self.config.dwell_threshold,
            self.runtime.clone(),
        )
    }

    /// Replaces the feed contents. Dedup state is keyed by URI and survives.
    pub fn set_playlists(&self, playlists: Vec<String>) {
        *self.playlists.write() = playlists;
    }

    pub fn playlist_count(&self) -> usize {
        self.playlists.read().len()
    }

    pub fn stage(&self, uri: &str) -> PrefetchStage {
        self.state.lock().stage(uri)
    }

    pub fn dedup_state(&self) -> DedupState {
        self.state.lock().clone()
    }

    /// Warms every not-yet-covered playlist within the window around `index`.
    pub fn on_active_index_changed(&self, index: usize) {
        if self.session.is_cancelled() {
            debug!(index, "Feed session ended, ignoring index change");
            return;
        }

        let targets: Vec<(usize, String)> = {
            let playlists = self.playlists.read();
            let Some(range) = window(index, self.config.prefetch_window, playlists.len()) else {
                return;
            };
            let mut state = self.state.lock();
            range
                .filter(|&i| state.claim_basic(&playlists[i]))
                .map(|i| (i, playlists[i].clone()))
                .collect()
        };

        if targets.is_empty() {
            return;
        }
        debug!(
            index,
            dispatched = targets.len(),
            "Dispatching window prefetch"
        );

        for (feed_index, uri) in targets {
            self.spawn_basic(feed_index, uri);
        }
    }

    /// Starts the extended prefetch for `uri`, at most once per session.
    pub fn on_dwell_threshold_reached(&self, uri: &str, index: usize) {
        if self.session.is_cancelled() {
            return;
        }
        if !self.state.lock().claim_deep(uri) {
            debug!(uri, index, "Extended prefetch already attempted");
            return;
        }
        info!(uri, index, "Sustained view, prefetching remaining segments");
        self.spawn_deep(index, uri.to_owned());
    }

    /// Waits until every prefetch dispatched so far has resolved.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Ends the session: cancels outstanding prefetches and waits for them to settle.
    pub async fn end_session(&self) {
        self.session.cancel();
        let pending: Vec<String> = self
            .state
            .lock()
            .pending()
            .map(str::to_owned)
            .collect();
        for uri in &pending {
            self.engine.cancel(uri);
        }
        self.tasks.close();
        self.tasks.wait().await;
        debug!(cancelled = pending.len(), "Feed session ended");
    }

    fn spawn_basic(&self, feed_index: usize, uri: String) {
        let engine = Arc::clone(&self.engine);
        let state = Arc::clone(&self.state);
        let session = self.session.clone();
        let count = self.config.initial_segment_count;

        let task = async move {
            let outcome = tokio::select! {
                _ = session.cancelled() => Err(PrefetchError::Cancelled),
                result = engine.prefetch(&uri, count) => result,
            };
            match outcome {
                Ok(result) => info!(
                    feed_index,
                    uri,
                    prefetched = result.prefetched_segments,
                    total = result.total_segments,
                    "Initial prefetch completed"
                ),
                Err(e) => warn!(feed_index, uri, error = %e, "Initial prefetch failed"),
            }
            state.lock().settle_basic(&uri);
        };
        self.tasks.spawn_on(task, &self.runtime);
    }

    fn spawn_deep(&self, feed_index: usize, uri: String) {
        let engine = Arc::clone(&self.engine);
        let state = Arc::clone(&self.state);
        let session = self.session.clone();
        let count = self.config.extended_segment_count;

        let task = async move {
            let outcome = tokio::select! {
                _ = session.cancelled() => Err(PrefetchError::Cancelled),
                result = engine.prefetch(&uri, count) => result,
            };
            state.lock().settle_deep(&uri);

            match outcome {
                Ok(result) => info!(
                    feed_index,
                    uri,
                    prefetched = result.prefetched_segments,
                    total = result.total_segments,
                    "Extended prefetch completed"
                ),
                Err(PrefetchError::Cancelled) => {
                    debug!(feed_index, uri, "Extended prefetch cancelled");
                    return;
                }
                Err(e) => warn!(feed_index, uri, error = %e, "Extended prefetch failed"),
            }

            match engine.cache_stats().await {
                Ok(stats) => info!(feed_index, "{stats}"),
                Err(e) => warn!(error = %e, "Failed to read cache stats"),
            }
        };
        self.tasks.spawn_on(task, &self.runtime);
    }
}

impl DwellListener for FeedPrefetcher {
    fn on_dwell_threshold_reached(&self, uri: &str, index: usize) {
        FeedPrefetcher::on_dwell_threshold_reached(self, uri, index);
    }
}
