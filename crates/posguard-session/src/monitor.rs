//! Background session monitor: periodic timer plus visibility listener.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{RefreshPolicy, ValidationCache, ValidationOutcome};

/// Page visibility as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Page is in the foreground.
    Visible,
    /// Page is backgrounded or the device slept.
    Hidden,
}

/// Platform-side source of visibility changes.
#[derive(Clone)]
pub struct VisibilitySignal {
    sender: Arc<watch::Sender<Visibility>>,
}

impl VisibilitySignal {
    /// Starts as [`Visibility::Visible`].
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Visibility::Visible);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publishes a visibility change.
    pub fn set(&self, visibility: Visibility) {
        self.sender.send_replace(visibility);
    }

    /// Current visibility.
    pub fn current(&self) -> Visibility {
        *self.sender.borrow()
    }

    /// Registers a listener.
    pub fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.sender.subscribe()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for VisibilitySignal {
    fn default() -> Self {
        Self::new()
    }
}

struct MonitorHandle {
    run_id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct MonitorInner {
    cache: ValidationCache,
    visibility: VisibilitySignal,
    interval: Duration,
    refresh_margin: Duration,
    handle: Mutex<Option<MonitorHandle>>,
    runs: AtomicU64,
}

/// Keeps the credential fresh proactively and revalidates when the page
/// regains attention.
///
/// Checks go through [`ValidationCache::revalidate`], so a monitor check and a
/// request-path check never run at the same time.
#[derive(Clone)]
pub struct SessionMonitor {
    inner: Arc<MonitorInner>,
}

enum Step {
    Continue,
    Stop,
}

impl SessionMonitor {
    /// Creates a stopped monitor.
    pub fn new(
        cache: ValidationCache,
        visibility: VisibilitySignal,
        interval: Duration,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                cache,
                visibility,
                interval,
                refresh_margin,
                handle: Mutex::new(None),
                runs: AtomicU64::new(0),
            }),
        }
    }

    /// Starts the timer and visibility listener.
    ///
    /// Returns `false` (and does nothing) when already running. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut handle = self.inner.handle.lock();
        if handle.is_some() {
            debug!("session monitoring already running");
            return false;
        }

        let run_id = self.inner.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let listener = self.inner.visibility.subscribe();
        let task = tokio::spawn(Arc::clone(&self.inner).run(run_id, listener, cancel.clone()));

        *handle = Some(MonitorHandle {
            run_id,
            cancel,
            task,
        });
        info!(
            interval_secs = self.inner.interval.as_secs(),
            refresh_margin_secs = self.inner.refresh_margin.as_secs(),
            "session monitoring started"
        );
        true
    }

    /// Releases the timer and visibility listener.
    ///
    /// Returns `false` when not running. The monitor task is aborted and never
    /// polled again; its visibility listener is dropped once the runtime reaps
    /// the task, so [`VisibilitySignal::listener_count`] may briefly include it.
    /// A validation already in flight runs in its own task and is left to
    /// finish and update the cache.
    pub fn stop(&self) -> bool {
        self.inner.release(None)
    }

    /// Returns `true` while started.
    pub fn is_running(&self) -> bool {
        self.inner.handle.lock().is_some()
    }

    /// Runs one check immediately, stopping the monitor when the session is
    /// gone or could not be refreshed.
    pub async fn perform_check(&self) -> ValidationOutcome {
        let outcome = self.inner.check().await;
        if let Step::Stop = MonitorInner::step_for(outcome) {
            self.inner.release(None);
        }
        outcome
    }
}

impl MonitorInner {
    async fn run(
        self: Arc<Self>,
        run_id: u64,
        mut visibility: watch::Receiver<Visibility>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_seen = *visibility.borrow_and_update();
        let mut listening = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("periodic session check");
                }
                changed = visibility.changed(), if listening => {
                    if changed.is_err() {
                        debug!("visibility source closed, continuing with timer only");
                        listening = false;
                        continue;
                    }
                    let now_seen = *visibility.borrow_and_update();
                    let regained = last_seen == Visibility::Hidden && now_seen == Visibility::Visible;
                    last_seen = now_seen;
                    if !regained {
                        continue;
                    }
                    info!("page visible again, revalidating session");
                    self.cache.invalidate();
                }
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.check() => outcome,
            };
            if let Step::Stop = Self::step_for(outcome) {
                self.release(Some(run_id));
                break;
            }
        }

        debug!(run_id, "session monitor task exiting");
    }

    async fn check(&self) -> ValidationOutcome {
        self.cache
            .revalidate(RefreshPolicy::Ahead(self.refresh_margin))
            .await
    }

    fn step_for(outcome: ValidationOutcome) -> Step {
        match outcome {
            ValidationOutcome::Valid
            | ValidationOutcome::Refreshed
            | ValidationOutcome::RefreshDeferred => Step::Continue,
            ValidationOutcome::NoSession | ValidationOutcome::RefreshFailed => {
                warn!(outcome = %outcome, "session lost, stopping monitor");
                Step::Stop
            }
            ValidationOutcome::Unverified => {
                error!("session check could not complete, retrying on next tick");
                Step::Continue
            }
        }
    }

    fn release(&self, only_run: Option<u64>) -> bool {
        let mut handle = self.handle.lock();
        let owned = handle
            .as_ref()
            .is_some_and(|current| only_run.is_none_or(|run_id| run_id == current.run_id));
        if !owned {
            return false;
        }

        if let Some(released) = handle.take() {
            released.cancel.cancel();
            released.task.abort();
            info!(run_id = released.run_id, "session monitoring stopped");
        }
        true
    }
}
