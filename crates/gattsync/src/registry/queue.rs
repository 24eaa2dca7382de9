//! Serialized per-resource event queue.
//!
//! Each resource gets one worker task. Jobs run strictly in arrival order and
//! never concurrently with each other. Enqueueing never blocks, so transports
//! may deliver from their own callback threads without a runtime context.

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::resource::ResourceKey;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct EventQueue {
    key: ResourceKey,
    tx: mpsc::UnboundedSender<Job>,
    worker: JoinHandle<()>,
}

impl EventQueue {
    pub fn spawn(key: ResourceKey, runtime: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let worker_key = key.clone();
        let worker = runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            tracing::debug!(key = %worker_key, "Event queue worker exiting");
        });

        Self { key, tx, worker }
    }

    /// Returns `false` if the queue has been closed.
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if self.tx.send(Box::new(job)).is_err() {
            tracing::warn!(key = %self.key, "Event queue closed - dropping event");
            return false;
        }
        true
    }

    /// Stop the worker. Jobs not yet started are dropped.
    pub fn close(&self) {
        self.worker.abort();
    }

    pub fn is_closed(&self) -> bool {
        self.worker.is_finished() || self.tx.is_closed()
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_run_in_arrival_order() {
        let queue = EventQueue::spawn(ResourceKey::scan(), &Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = Arc::clone(&seen);
            assert!(queue.enqueue(move || seen.lock().unwrap().push(i)));
        }

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        queue.enqueue(move || {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn enqueue_from_foreign_thread() {
        let queue = Arc::new(EventQueue::spawn(ResourceKey::scan(), &Handle::current()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let q = Arc::clone(&queue);
        std::thread::spawn(move || {
            q.enqueue(move || {
                let _ = done_tx.send(std::thread::current().name().map(str::to_string));
            });
        })
        .join()
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .expect("job should run")
            .unwrap();
    }

    #[tokio::test]
    async fn closed_queue_drops_jobs() {
        let queue = EventQueue::spawn(ResourceKey::scan(), &Handle::current());
        queue.close();
        tokio::task::yield_now().await;

        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        queue.enqueue(move || *flag.lock().unwrap() = true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!*ran.lock().unwrap());
    }
}
