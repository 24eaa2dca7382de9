//! Serialized per-resource queue for application work.
//!
//! Kept apart from the event queue: a process usually awaits calls whose
//! completions are routed through the event queue of the same resource.

use std::future::Future;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::resource::ResourceKey;

type Process = BoxFuture<'static, ()>;

pub struct ProcessQueue {
    key: ResourceKey,
    tx: mpsc::UnboundedSender<Process>,
    worker: JoinHandle<()>,
}

impl ProcessQueue {
    pub fn spawn(key: ResourceKey, runtime: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Process>();

        let worker_key = key.clone();
        let worker = runtime.spawn(async move {
            while let Some(process) = rx.recv().await {
                // Own task per process so a panic does not take the queue down.
                if let Err(e) = tokio::spawn(process).await
                    && e.is_panic()
                {
                    tracing::error!(key = %worker_key, "Process panicked");
                }
            }
            tracing::debug!(key = %worker_key, "Process queue worker exiting");
        });

        Self { key, tx, worker }
    }

    /// Returns `false` if the queue has been closed.
    pub fn enqueue(&self, process: impl Future<Output = ()> + Send + 'static) -> bool {
        if self.tx.send(Box::pin(process)).is_err() {
            tracing::warn!(key = %self.key, "Process queue closed - dropping process");
            return false;
        }
        true
    }

    /// Stop the worker. Processes not yet started are dropped; a running one
    /// completes on its own task.
    pub fn close(&self) {
        self.worker.abort();
    }
}

impl Drop for ProcessQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
