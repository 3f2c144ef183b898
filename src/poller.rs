//! A periodic background task used by the spec store's two sync loops.
//!
//! Each tick runs the task future to completion before the next tick is scheduled, so a slow
//! sync can never overlap itself. The poller records when its latest tick started; the store's
//! watchdog uses that stamp to detect a loop whose task has wedged.
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::{thread_rng, Rng};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Configuration for [`Poller`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval to wait between ticks.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_INTERVAL`].
    pub interval: Duration,
    /// Jitter applies a randomized reduction to each wait. This helps to avoid multiple
    /// server instances synchronizing and producing spiky network load.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_JITTER`].
    pub jitter: Duration,
}

impl PollerConfig {
    /// Default value for [`PollerConfig::interval`].
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
    /// Default value for [`PollerConfig::jitter`].
    pub const DEFAULT_JITTER: Duration = Duration::from_secs(1);

    /// Create a new `PollerConfig` using default configuration.
    pub fn new() -> PollerConfig {
        PollerConfig::default()
    }

    /// Update poll interval with `interval`.
    pub fn with_interval(mut self, interval: Duration) -> PollerConfig {
        self.interval = interval;
        self
    }

    /// Update poll interval jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> PollerConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for PollerConfig {
    fn default() -> PollerConfig {
        PollerConfig {
            interval: PollerConfig::DEFAULT_INTERVAL,
            jitter: PollerConfig::DEFAULT_JITTER,
        }
    }
}

/// A non-reentrant periodic task on the tokio runtime.
pub struct Poller {
    handle: JoinHandle<()>,
    stop: Arc<Notify>,
    last_active: Arc<Mutex<Instant>>,
}

impl Poller {
    /// Spawn the polling task. The first tick fires after one (jittered) interval; callers
    /// that need an immediate run perform it before starting the poller.
    pub fn start<F, Fut>(config: PollerConfig, mut task: F) -> Poller
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let stop = Arc::new(Notify::new());
        let last_active = Arc::new(Mutex::new(Instant::now()));

        let handle = {
            let stop = Arc::clone(&stop);
            let last_active = Arc::clone(&last_active);
            tokio::spawn(async move {
                loop {
                    let delay = jittered_delay(config.interval, config.jitter);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            *last_active
                                .lock()
                                .expect("thread holding poller stamp lock should not panic") =
                                Instant::now();
                            // Runs to completion before the next tick is armed.
                            task().await;
                        }
                        _ = stop.notified() => return,
                    }
                }
            })
        };

        Poller {
            handle,
            stop,
            last_active,
        }
    }

    /// When the latest tick started.
    pub fn last_active(&self) -> Instant {
        *self
            .last_active
            .lock()
            .expect("thread holding poller stamp lock should not panic")
    }

    /// Return `true` if no tick has started within `threshold`.
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        self.last_active().elapsed() > threshold
    }

    /// Request the poller to stop without waiting. A tick that is mid-flight finishes on its
    /// own; a wedged tick is only reclaimed by [`Poller::abort`].
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Tear the task down immediately, cancelling any in-flight tick.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Stop the poller and wait for the in-flight tick, if any, to finish.
    pub async fn shutdown(self) {
        self.stop.notify_one();
        // Join error means the task panicked or was aborted; either way it is gone.
        let _ = self.handle.await;
    }
}

/// Shorten `interval` by a random amount of up to `max_jitter`, so a fleet of servers
/// drifts apart instead of polling in lockstep. Jitter only ever shortens the wait.
fn jittered_delay(interval: Duration, max_jitter: Duration) -> Duration {
    if max_jitter.is_zero() {
        return interval;
    }
    let cut = thread_rng().gen_range(0..=max_jitter.as_millis() as u64);
    interval.saturating_sub(Duration::from_millis(cut))
}
