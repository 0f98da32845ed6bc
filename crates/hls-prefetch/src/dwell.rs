// Dwell timer: fires once a playlist has stayed active for the configured threshold.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::FeedConfig;
use crate::error::PrefetchError;

/// Receiver of the sustained-view signal.
pub trait DwellListener: Send + Sync {
    fn on_dwell_threshold_reached(&self, uri: &str, index: usize);
}

struct ArmedTimer {
    uri: String,
    index: usize,
    token: CancellationToken,
}

/// A single restartable timer tracking the currently active playlist.
///
/// Arming replaces any previous timer, so only the latest active item can fire.
/// `arm` and `disarm` may be called from any thread.
pub struct DwellTimer {
    listener: Arc<dyn DwellListener>,
    threshold: Duration,
    current: Mutex<Option<ArmedTimer>>,
    runtime: Handle,
}

impl DwellTimer {
    /// Creates a timer on the current tokio runtime.
    pub fn new(listener: Arc<dyn DwellListener>, threshold: Duration) -> Result<Self, PrefetchError> {
        let runtime = Handle::try_current().map_err(|e| {
            PrefetchError::configuration(format!("dwell timer needs a tokio runtime: {e}"))
        })?;
        Ok(Self::with_handle(listener, threshold, runtime))
    }

    /// Creates a timer firing after `config.dwell_threshold`.
    pub fn from_config(
        listener: Arc<dyn DwellListener>,
        config: &FeedConfig,
    ) -> Result<Self, PrefetchError> {
        Self::new(listener, config.dwell_threshold)
    }

    pub fn with_handle(listener: Arc<dyn DwellListener>, threshold: Duration, runtime: Handle) -> Self {
        Self {
            listener,
            threshold,
            current: Mutex::new(None),
            runtime,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Starts timing `uri`.
    pub fn arm(&self, uri: impl Into<String>, index: usize) {
        let uri = uri.into();
        let token = CancellationToken::new();

        {
            let mut current = self.current.lock();
            if let Some(previous) = current.as_ref()
                && previous.uri == uri
                && previous.index == index
                && !previous.token.is_cancelled()
            {
                return;
            }
            if let Some(previous) = current.replace(ArmedTimer {
                uri: uri.clone(),
                index,
                token: token.clone(),
            }) {
                previous.token.cancel();
            }
        }

        let listener = Arc::clone(&self.listener);
        let threshold = self.threshold;
        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(uri, index, "Dwell timer disarmed");
                }
                _ = tokio::time::sleep(threshold) => {
                    if !token.is_cancelled() {
                        token.cancel();
                        listener.on_dwell_threshold_reached(&uri, index);
                    }
                }
            }
        });
    }

    /// Stops the running timer, if any.
    pub fn disarm(&self) {
        if let Some(previous) = self.current.lock().take() {
            previous.token.cancel();
        }
    }

    /// URI of the timer still waiting to fire.
    pub fn armed_uri(&self) -> Option<String> {
        self.current
            .lock()
            .as_ref()
            .filter(|timer| !timer.token.is_cancelled())
            .map(|timer| timer.uri.clone())
    }
}

impl Drop for DwellTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingListener {
        fired: Mutex<Vec<(String, usize)>>,
    }

    impl DwellListener for RecordingListener {
        fn on_dwell_threshold_reached(&self, uri: &str, index: usize) {
            self.fired.lock().push((uri.to_owned(), index));
        }
    }

    fn timer() -> (Arc<RecordingListener>, DwellTimer) {
        let listener = Arc::new(RecordingListener::default());
        let timer = DwellTimer::new(listener.clone(), Duration::from_millis(5000)).unwrap();
        (listener, timer)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_threshold() {
        let (listener, timer) = timer();
        timer.arm("a.m3u8", 3);

        advance(4999).await;
        assert!(listener.fired.lock().is_empty());
        assert_eq!(timer.armed_uri().as_deref(), Some("a.m3u8"));

        advance(2).await;
        assert_eq!(*listener.fired.lock(), vec![("a.m3u8".to_owned(), 3)]);
        assert_eq!(timer.armed_uri(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_timer() {
        let (listener, timer) = timer();
        timer.arm("a.m3u8", 0);
        advance(3000).await;
        timer.arm("b.m3u8", 1);
        advance(3000).await;
        assert!(listener.fired.lock().is_empty());

        advance(2001).await;
        assert_eq!(*listener.fired.lock(), vec![("b.m3u8".to_owned(), 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_same_item_keeps_original_deadline() {
        let (listener, timer) = timer();
        timer.arm("a.m3u8", 0);
        advance(3000).await;
        timer.arm("a.m3u8", 0);
        advance(2001).await;
        assert_eq!(listener.fired.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_prevents_firing() {
        let (listener, timer) = timer();
        timer.arm("a.m3u8", 0);
        advance(1000).await;
        timer.disarm();
        advance(10_000).await;
        assert!(listener.fired.lock().is_empty());
        assert_eq!(timer.armed_uri(), None);
    }

    #[test]
    fn new_requires_a_runtime() {
        let listener = Arc::new(RecordingListener::default());
        let err = DwellTimer::new(listener, Duration::from_millis(10))
            .err()
            .unwrap();
        assert!(matches!(err, PrefetchError::Configuration { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn from_config_uses_dwell_threshold() {
        let listener = Arc::new(RecordingListener::default());
        let timer = DwellTimer::from_config(listener.clone(), &FeedConfig::default()).unwrap();
        assert_eq!(timer.threshold(), Duration::from_millis(5000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn arms_from_non_runtime_thread() {
        let listener = Arc::new(RecordingListener::default());
        let timer = Arc::new(DwellTimer::new(listener.clone(), Duration::from_millis(20)).unwrap());

        let caller = Arc::clone(&timer);
        std::thread::spawn(move || caller.arm("a.m3u8", 4))
            .join()
            .unwrap();

        for _ in 0..100 {
            if !listener.fired.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*listener.fired.lock(), vec![("a.m3u8".to_owned(), 4)]);
    }
}
