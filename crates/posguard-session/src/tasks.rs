//! Deferred work queue drained by a single worker.
//!
//! Event handlers enqueue follow-up work here instead of awaiting provider
//! calls inline, so nothing ever re-enters the emitter from inside its own
//! callback.

use std::future::Future;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct DeferredTask {
    label: &'static str,
    work: BoxFuture<'static, ()>,
}

/// Producer side; cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<DeferredTask>,
}

/// Consumer side; runs tasks one at a time in enqueue order.
pub struct TaskWorker {
    receiver: mpsc::UnboundedReceiver<DeferredTask>,
}

impl TaskQueue {
    /// Creates a connected queue and worker.
    pub fn channel() -> (Self, TaskWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, TaskWorker { receiver })
    }

    /// Queues `work` without polling it.
    ///
    /// Returns `false` when the worker is gone and the task was dropped.
    pub fn enqueue<F>(&self, label: &'static str, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = DeferredTask {
            label,
            work: work.boxed(),
        };
        match self.sender.send(task) {
            Ok(()) => {
                debug!(task = label, "deferred task queued");
                true
            }
            Err(_) => {
                warn!(task = label, "task worker stopped, dropping deferred task");
                false
            }
        }
    }
}

impl TaskWorker {
    /// Runs tasks until every [`TaskQueue`] handle is dropped.
    pub async fn run(mut self) {
        while self.run_next().await {}
        debug!("task worker drained");
    }

    /// Waits for and runs the next task. Returns `false` once the queue is
    /// closed and empty.
    pub async fn run_next(&mut self) -> bool {
        match self.receiver.recv().await {
            Some(task) => {
                debug!(task = task.label, "running deferred task");
                task.work.await;
                true
            }
            None => false,
        }
    }

    /// Runs every task already queued without waiting for new ones.
    pub async fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            debug!(task = task.label, "running deferred task");
            task.work.await;
            ran += 1;
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the deferred task queue.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn enqueue_does_not_run_until_worker_polls() {
        let (queue, mut worker) = TaskQueue::channel();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        assert!(queue.enqueue("count", async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert_eq!(worker.run_pending().await, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enqueue_after_worker_drop_reports_failure() {
        let (queue, worker) = TaskQueue::channel();
        drop(worker);
        assert!(!queue.enqueue("orphan", async {}));
    }

    #[tokio::test]
    async fn run_returns_once_all_queues_dropped() {
        let (queue, worker) = TaskQueue::channel();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for index in 0..3 {
            let order = Arc::clone(&order);
            queue.enqueue("ordered", async move { order.lock().push(index) });
        }
        drop(queue);

        worker.run().await;
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
