//! Single-flight cell: at most one execution in flight, every caller observes
//! its one result.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use thiserror::Error;

/// The in-flight task ended without producing a value (panicked or was
/// aborted by runtime shutdown).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("in-flight task ended without a result: {0}")]
pub struct FlightAborted(String);

type Flight<T> = Shared<BoxFuture<'static, Result<T, FlightAborted>>>;

struct Slot<T: Clone> {
    id: u64,
    generation: u64,
    flight: Flight<T>,
}

type SlotCell<T> = Arc<Mutex<Option<Slot<T>>>>;

/// Guarded future cell shared by every path that may trigger the same
/// underlying work.
///
/// Each run is tagged with a caller-supplied generation. Callers join an
/// in-flight run of the same or a newer generation. A caller with a newer
/// generation waits for an older run to settle and then starts its own, so two
/// runs never overlap.
///
/// Runs are spawned onto the tokio runtime: dropping every waiter does not
/// cancel the work.
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    slot: SlotCell<T>,
    launches: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    /// Creates an idle cell.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            launches: AtomicU64::new(0),
        }
    }

    /// Joins the current run or starts `launch()` as a new one.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`FlightAborted`] when the run panicked or was aborted.
    pub async fn run<F, Fut>(&self, generation: u64, launch: F) -> Result<T, FlightAborted>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let flight = loop {
            let superseded = {
                let mut slot = self.slot.lock();
                match slot.as_ref() {
                    Some(current) if current.generation >= generation => {
                        break current.flight.clone();
                    }
                    Some(older) => older.flight.clone(),
                    None => {
                        let id = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
                        // The slot lock is held while spawning so the task's
                        // release cannot run before the slot is populated.
                        let flight = spawn_flight(Arc::clone(&self.slot), id, launch());
                        *slot = Some(Slot {
                            id,
                            generation,
                            flight: flight.clone(),
                        });
                        break flight;
                    }
                }
            };
            let _ = superseded.await;
        };

        flight.await
    }

    /// Returns `true` while a run is in flight.
    pub fn is_in_flight(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Total number of runs started.
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct ReleaseOnDrop<T: Clone> {
    slot: SlotCell<T>,
    id: u64,
}

impl<T: Clone> Drop for ReleaseOnDrop<T> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|current| current.id == self.id) {
            *slot = None;
        }
    }
}

fn spawn_flight<T, Fut>(slot: SlotCell<T>, id: u64, work: Fut) -> Flight<T>
where
    T: Clone + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let _release = ReleaseOnDrop { slot, id };
        work.await
    });

    async move {
        handle
            .await
            .map_err(|error| FlightAborted(error.to_string()))
    }
    .boxed()
    .shared()
}
