//! `WorkQueue` (§4.7): a bounded channel plus a fixed worker pool, modeled
//! on the teacher's `JoinSet`-backed worker pool (`client-engine/src/engine.rs`).
//! `try_send` gives the producer non-blocking backpressure: once the
//! channel is full, new work is rejected rather than queued unboundedly.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// One unit of upload work dispatched to a worker.
pub enum UploadJob {
    ActivityBatch { batch_id: String },
    IdleSession { idle_session_id: i64 },
    Screenshot { screenshot_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

pub struct WorkQueue {
    tx: mpsc::Sender<UploadJob>,
    workers: JoinSet<()>,
}

impl WorkQueue {
    /// Spawns `worker_count` tasks, each looping on `handler` until the
    /// channel closes.
    pub fn start<F, Fut>(capacity: usize, worker_count: usize, handler: F) -> Self
    where
        F: Fn(UploadJob) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let handler = Arc::new(handler);
        let mut workers = JoinSet::new();

        for _ in 0..worker_count.max(1) {
            let rx = rx.clone();
            let handler = handler.clone();
            workers.spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match job {
                        Some(job) => handler(job).await,
                        None => break,
                    }
                }
            });
        }

        Self { tx, workers }
    }

    /// Non-blocking enqueue; returns `QueueFull` immediately rather than
    /// waiting for a worker slot (L2 backpressure).
    pub fn try_submit(&self, job: UploadJob) -> Result<(), QueueFull> {
        self.tx.try_send(job).map_err(|_| QueueFull)
    }

    /// Stops accepting new work and waits for in-flight jobs to drain.
    pub async fn shutdown(mut self) {
        drop(self.tx);
        while self.workers.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn overflow_is_rejected_without_blocking() {
        let processed = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(tokio::sync::Notify::new());
        let processed_for_handler = processed.clone();
        let gate_for_handler = gate.clone();

        let queue = WorkQueue::start(1, 1, move |_job: UploadJob| {
            let processed = processed_for_handler.clone();
            let gate = gate_for_handler.clone();
            async move {
                gate.notified().await;
                processed.fetch_add(1, Ordering::SeqCst);
            }
        });

        // First job occupies the single worker, blocked on the gate.
        queue
            .try_submit(UploadJob::ActivityBatch {
                batch_id: "b1".into(),
            })
            .unwrap();
        tokio::task::yield_now().await;

        // Second job fills the channel's one slot of capacity.
        queue
            .try_submit(UploadJob::ActivityBatch {
                batch_id: "b2".into(),
            })
            .unwrap();

        // Third job has nowhere to go: must be rejected immediately.
        let result = queue.try_submit(UploadJob::ActivityBatch {
            batch_id: "b3".into(),
        });
        assert_eq!(result, Err(QueueFull));

        gate.notify_waiters();
    }
}
