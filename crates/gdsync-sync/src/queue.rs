//! Work queue
//!
//! A strict FIFO over async thunks, consumed by one dedicated task. At
//! most one thunk is in flight; thunks run in enqueue order; producers
//! never wait on later thunks. Local watcher reactions are the main
//! producer.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type Thunk = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Producer half of the queue.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Thunk>,
}

/// Consumer half of the queue; [`run`](WorkQueueRunner::run) drives it.
pub struct WorkQueueRunner {
    rx: mpsc::UnboundedReceiver<Thunk>,
}

impl WorkQueue {
    /// Creates a queue and its runner.
    pub fn new() -> (Self, WorkQueueRunner) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, WorkQueueRunner { rx })
    }

    /// Enqueues a thunk. Returns false once the runner has stopped.
    pub fn push<F>(&self, thunk: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.send(Box::pin(thunk)).is_ok()
    }
}

impl WorkQueueRunner {
    /// Consumes thunks one at a time until the queue closes or the token
    /// fires. A thunk already in flight always runs to completion; the
    /// token is only observed between thunks.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                thunk = self.rx.recv() => match thunk {
                    Some(thunk) => thunk.await,
                    None => break,
                },
            }
        }
        debug!("Work queue stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn test_thunks_run_in_fifo_order() {
        let (queue, runner) = WorkQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            queue.push(async move {
                order.lock().await.push(i);
            });
        }
        drop(queue);

        runner.run(CancellationToken::new()).await;
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_at_most_one_thunk_in_flight() {
        let (queue, runner) = WorkQueue::new();
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        for _ in 0..4 {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            queue.push(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        drop(queue);

        runner.run(CancellationToken::new()).await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_finishes_current_thunk() {
        let (queue, runner) = WorkQueue::new();
        let cancel = CancellationToken::new();
        let completed = Arc::new(AtomicU32::new(0));

        let token = cancel.clone();
        let done = completed.clone();
        queue.push(async move {
            // Cancel while this thunk is mid-flight.
            token.cancel();
            tokio::time::sleep(Duration::from_millis(5)).await;
            done.fetch_add(1, Ordering::SeqCst);
        });
        let done = completed.clone();
        queue.push(async move {
            done.fetch_add(1, Ordering::SeqCst);
        });

        runner.run(cancel).await;

        // The in-flight thunk drained; the queued one did not start.
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_push_after_runner_stopped() {
        let (queue, runner) = WorkQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        runner.run(cancel).await;

        assert!(!queue.push(async {}));
    }
}
