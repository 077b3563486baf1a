//! Cancellable polling loop.
//!
//! The next fetch is scheduled `interval` after the previous one settles,
//! not at a fixed rate, so a slow network never stacks requests up:
//!
//! ```text
//! Idle ─► Fetching ─► Idle ─► Fetching ─► ... ─► Stopped
//! ```
//!
//! At most one fetch is in flight and results merge in call order.
//! Stopping cancels the pending wait; a fetch already in flight finishes
//! but its result is discarded.

use crate::error::{SyncError, SyncResult};
use crate::session::Liveness;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// State of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Waiting for the next run (or not started).
    Idle,
    /// A fetch is in flight.
    Fetching,
    /// Stopped for good.
    Stopped,
}

/// Statistics about a polling loop.
#[derive(Debug, Clone, Default)]
pub struct PollStats {
    /// Fetches whose result was merged.
    pub runs: u64,
    /// Fetches that failed.
    pub failures: u64,
    /// Fetches whose result arrived after stop or teardown.
    pub discarded: u64,
    /// Last merge time.
    pub last_success: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

struct Shared {
    state: RwLock<PollState>,
    stats: RwLock<PollStats>,
    liveness: Liveness,
    started: AtomicBool,
    stopped: AtomicBool,
    wake: Notify,
}

impl Shared {
    fn is_live(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.liveness.is_alive()
    }

    fn set_state(&self, state: PollState) {
        *self.state.write() = state;
    }
}

/// Runs a fetch-and-merge cycle repeatedly until stopped.
pub struct PollingRefresher {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PollingRefresher {
    /// Creates a refresher with its own liveness flag.
    pub fn new() -> Self {
        Self::with_liveness(Liveness::new())
    }

    /// Creates a refresher that also stops merging once `liveness` dies.
    pub fn with_liveness(liveness: Liveness) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(PollState::Idle),
                stats: RwLock::new(PollStats::default()),
                liveness,
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                wake: Notify::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> PollState {
        *self.shared.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> PollStats {
        self.shared.stats.read().clone()
    }

    /// Starts polling on the current tokio runtime.
    ///
    /// `fetch` runs immediately, then `interval` after each settled run.
    /// `merge` receives each successful result unless the refresher was
    /// stopped or its liveness died while the fetch was in flight. Failed
    /// fetches are logged and counted; polling continues.
    ///
    /// A refresher starts once; starting it again, or after a stop, is an
    /// invalid transition.
    pub fn start<F, Fut, T, M>(&self, interval: Duration, mut fetch: F, mut merge: M) -> SyncResult<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
        T: Send + 'static,
        M: FnMut(T) + Send + 'static,
    {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(SyncError::InvalidStateTransition {
                from: "Stopped".into(),
                to: "Fetching".into(),
            });
        }
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "started".into(),
            });
        }

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            while shared.is_live() {
                shared.set_state(PollState::Fetching);
                let result = fetch().await;

                if !shared.is_live() {
                    shared.stats.write().discarded += 1;
                    debug!("poll result arrived after stop; discarded");
                    break;
                }

                match result {
                    Ok(value) => {
                        merge(value);
                        let mut stats = shared.stats.write();
                        stats.runs += 1;
                        stats.last_success = Some(Instant::now());
                        stats.last_error = None;
                    }
                    Err(err) => {
                        warn!(error = %err, "poll fetch failed");
                        let mut stats = shared.stats.write();
                        stats.failures += 1;
                        stats.last_error = Some(err.to_string());
                    }
                }

                shared.set_state(PollState::Idle);
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shared.wake.notified() => {}
                    _ = shared.liveness.killed() => {}
                }
            }
            shared.set_state(PollState::Stopped);
            debug!("polling stopped");
        });

        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Stops polling. Idempotent.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        // Stored as a permit if the loop is mid-fetch.
        self.shared.wake.notify_one();
        if !self.shared.started.load(Ordering::SeqCst) {
            self.shared.set_state(PollState::Stopped);
        }
    }

    /// Waits for the loop task to finish after [`stop`](Self::stop).
    pub async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "polling task ended abnormally");
            }
        }
    }
}

impl Default for PollingRefresher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PollingRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_never_overlaps() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (in_flight_c, peak_c) = (Arc::clone(&in_flight), Arc::clone(&peak));

        let refresher = PollingRefresher::new();
        refresher
            .start(
                Duration::from_millis(10),
                move || {
                    let in_flight = Arc::clone(&in_flight_c);
                    let peak = Arc::clone(&peak_c);
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        // Slower than the interval.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                |_| {},
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        refresher.stop();
        refresher.join().await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(refresher.stats().runs >= 3);
        assert_eq!(refresher.state(), PollState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn results_merge_in_call_order() {
        let counter = Arc::new(AtomicU64::new(0));
        let merged = Arc::new(Mutex::new(Vec::new()));
        let merged_c = Arc::clone(&merged);

        let refresher = PollingRefresher::new();
        refresher
            .start(
                Duration::from_millis(5),
                move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        // Earlier calls are slower; order must still hold.
                        tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(n))).await;
                        Ok(n)
                    }
                },
                move |n| merged_c.lock().push(n),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        refresher.stop();
        refresher.join().await;

        let merged = merged.lock().clone();
        assert!(merged.len() >= 3);
        assert!(merged.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_result() {
        let merged = Arc::new(AtomicUsize::new(0));
        let merged_c = Arc::clone(&merged);

        let refresher = PollingRefresher::new();
        refresher
            .start(
                Duration::from_secs(30),
                || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                },
                move |_| {
                    merged_c.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(refresher.state(), PollState::Fetching);
        refresher.stop();
        refresher.join().await;

        assert_eq!(merged.load(Ordering::SeqCst), 0);
        assert_eq!(refresher.stats().discarded, 1);
        assert_eq!(refresher.state(), PollState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_wait() {
        let refresher = PollingRefresher::new();
        refresher
            .start(Duration::from_secs(3600), || async { Ok(()) }, |_| {})
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(refresher.state(), PollState::Idle);

        let before = tokio::time::Instant::now();
        refresher.stop();
        refresher.join().await;
        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(refresher.stats().runs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_errors_keep_polling() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_c = Arc::clone(&attempts);

        let refresher = PollingRefresher::new();
        refresher
            .start(
                Duration::from_millis(10),
                move || {
                    let n = attempts_c.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(SyncError::Remote(crate::RemoteError::network("offline")))
                        } else {
                            Ok(())
                        }
                    }
                },
                |_| {},
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(35)).await;
        refresher.stop();
        refresher.join().await;

        let stats = refresher.stats();
        assert_eq!(stats.failures, 1);
        assert!(stats.runs >= 2);
        assert!(stats.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn session_teardown_discards_result() {
        let liveness = Liveness::new();
        let merged = Arc::new(AtomicUsize::new(0));
        let merged_c = Arc::clone(&merged);

        let refresher = PollingRefresher::with_liveness(liveness.clone());
        refresher
            .start(
                Duration::from_millis(10),
                || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                },
                move |_| {
                    merged_c.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        liveness.kill();
        refresher.join().await;

        assert_eq!(merged.load(Ordering::SeqCst), 0);
        assert_eq!(refresher.state(), PollState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_while_idle_ends_loop_promptly() {
        let liveness = Liveness::new();
        let refresher = PollingRefresher::with_liveness(liveness.clone());
        refresher
            .start(Duration::from_secs(30), || async { Ok(()) }, |_| {})
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(refresher.state(), PollState::Idle);

        let before = tokio::time::Instant::now();
        liveness.kill();
        refresher.join().await;
        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(refresher.state(), PollState::Stopped);
        assert_eq!(refresher.stats().runs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn next_run_waits_interval_after_previous_settles() {
        let interval = Duration::from_millis(10);
        let fetch_time = Duration::from_millis(30);
        let spans = Arc::new(Mutex::new(Vec::new()));
        let spans_c = Arc::clone(&spans);

        let refresher = PollingRefresher::new();
        refresher
            .start(
                interval,
                move || {
                    let spans = Arc::clone(&spans_c);
                    async move {
                        let start = tokio::time::Instant::now();
                        tokio::time::sleep(fetch_time).await;
                        spans.lock().push((start, tokio::time::Instant::now()));
                        Ok(())
                    }
                },
                |_| {},
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        refresher.stop();
        refresher.join().await;

        let spans = spans.lock().clone();
        assert!(spans.len() >= 4);
        for pair in spans.windows(2) {
            let (_, previous_end) = pair[0];
            let (next_start, _) = pair[1];
            assert!(next_start - previous_end >= interval);
            // Not a fixed rate: the fetch time is added to every period.
            assert!(next_start - pair[0].0 >= interval + fetch_time);
        }
    }

    #[tokio::test]
    async fn start_is_single_shot() {
        let refresher = PollingRefresher::new();
        refresher
            .start(Duration::from_secs(60), || async { Ok(()) }, |_| {})
            .unwrap();
        let err = refresher
            .start(Duration::from_secs(60), || async { Ok(()) }, |_| {})
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));

        refresher.stop();
        let err = refresher
            .start(Duration::from_secs(60), || async { Ok(()) }, |_| {})
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
    }

    #[test]
    fn stop_before_start_is_terminal() {
        let refresher = PollingRefresher::new();
        refresher.stop();
        assert_eq!(refresher.state(), PollState::Stopped);
    }
}
