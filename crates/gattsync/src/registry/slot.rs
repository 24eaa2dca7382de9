//! Slot - per-resource lanes of in-flight calls.
//!
//! A lane exists for an operation kind only while a call of that kind is
//! waiting. Each cycle owns a fresh oneshot gate, so a completion can be
//! written at most once and a late event can never release a later cycle.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::process::ProcessQueue;
use super::queue::EventQueue;
use crate::error::BridgeError;
use crate::operation::{Completion, OperationKind, PendingResult};
use crate::resource::ResourceKey;

struct Lane {
    cycle: u64,
    /// Attribute the waiting call targets; events for other attributes are stale.
    target: Option<Uuid>,
    gate: oneshot::Sender<PendingResult>,
}

impl Lane {
    fn accepts(&self, target: Option<Uuid>) -> bool {
        match (self.target, target) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => true,
        }
    }
}

pub struct Slot {
    key: ResourceKey,
    lanes: Mutex<HashMap<OperationKind, Lane>>,
    queue: EventQueue,
    processes: ProcessQueue,
    next_cycle: AtomicU64,
}

impl Slot {
    pub fn new(key: ResourceKey, runtime: &Handle) -> Self {
        let queue = EventQueue::spawn(key.clone(), runtime);
        let processes = ProcessQueue::spawn(key.clone(), runtime);
        Self {
            key,
            lanes: Mutex::new(HashMap::new()),
            queue,
            processes,
            next_cycle: AtomicU64::new(1),
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    fn lanes(&self) -> MutexGuard<'_, HashMap<OperationKind, Lane>> {
        match self.lanes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(key = %self.key, "Slot lanes mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Mark `kind` in flight and hand out the cycle's waiting side.
    ///
    /// A second call of the same kind on the same resource is rejected.
    pub fn begin(
        self: &Arc<Self>,
        kind: OperationKind,
        target: Option<Uuid>,
    ) -> Result<Cycle, BridgeError> {
        let mut lanes = self.lanes();
        if lanes.contains_key(&kind) {
            tracing::warn!(key = %self.key, %kind, "Rejecting concurrent call of the same kind");
            return Err(BridgeError::AlreadyInProgress(kind));
        }

        let cycle = self.next_cycle.fetch_add(1, Ordering::Relaxed);
        let (gate, rx) = oneshot::channel();
        lanes.insert(kind, Lane { cycle, target, gate });
        drop(lanes);

        tracing::debug!(key = %self.key, %kind, cycle, "Cycle started");
        Ok(Cycle {
            slot: Arc::clone(self),
            kind,
            id: cycle,
            rx: Some(rx),
        })
    }

    pub fn is_in_flight(&self, kind: OperationKind) -> bool {
        self.lanes().contains_key(&kind)
    }

    /// Write the result for `kind` and release its gate.
    ///
    /// Returns `false` when nothing is waiting for it: no lane, a lane for a
    /// different attribute, or a waiter that already gave up.
    pub fn complete(&self, kind: OperationKind, target: Option<Uuid>, result: PendingResult) -> bool {
        let lane = {
            let mut lanes = self.lanes();
            if lanes.get(&kind).is_some_and(|lane| lane.accepts(target)) {
                lanes.remove(&kind)
            } else {
                None
            }
        };

        let Some(lane) = lane else {
            return false;
        };

        if lane.gate.send(result).is_err() {
            tracing::debug!(key = %self.key, %kind, cycle = lane.cycle, "Waiter gone before completion");
            return false;
        }
        tracing::debug!(key = %self.key, %kind, cycle = lane.cycle, "Cycle completed");
        true
    }

    /// Clear the lane for `kind`, but only if it still belongs to `cycle`.
    fn abandon(&self, kind: OperationKind, cycle: u64) {
        let mut lanes = self.lanes();
        if lanes.get(&kind).is_some_and(|lane| lane.cycle == cycle) {
            lanes.remove(&kind);
        }
    }

    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.queue.enqueue(job)
    }

    /// Queue application work behind earlier work for this resource.
    pub fn add_process(&self, process: impl Future<Output = ()> + Send + 'static) -> bool {
        self.processes.enqueue(process)
    }

    /// Stop both queues and drop every in-flight gate.
    ///
    /// Waiters observe a released gate without a result.
    pub fn close(&self) {
        self.queue.close();
        self.processes.close();
        let dropped = {
            let mut lanes = self.lanes();
            let n = lanes.len();
            lanes.clear();
            n
        };
        if dropped > 0 {
            tracing::warn!(key = %self.key, in_flight = dropped, "Slot closed with calls in flight");
        }
    }
}

/// Waiting side of one request/response cycle.
///
/// Dropping the cycle, on any path, clears its lane.
#[must_use = "an unawaited cycle is abandoned on drop"]
pub struct Cycle {
    slot: Arc<Slot>,
    kind: OperationKind,
    id: u64,
    rx: Option<oneshot::Receiver<PendingResult>>,
}

impl Cycle {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Wait for the completion. `None` waits indefinitely.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Completion, BridgeError> {
        let kind = self.kind;
        let Some(rx) = self.rx.take() else {
            return Err(BridgeError::ResultMissing(kind));
        };

        let received = match timeout {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::warn!(key = %self.slot.key, %kind, ?deadline, "Timed out waiting for completion");
                    return Err(BridgeError::TimedOut(kind));
                }
            },
            None => rx.await,
        };

        match received {
            Ok(Ok(completion)) => Ok(completion),
            Ok(Err(e)) => Err(BridgeError::Transport(e)),
            Err(_) => {
                tracing::error!(key = %self.slot.key, %kind, "Gate released without a result");
                Err(BridgeError::ResultMissing(kind))
            }
        }
    }
}

impl Drop for Cycle {
    fn drop(&mut self) {
        self.slot.abandon(self.kind, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    fn slot() -> Arc<Slot> {
        Arc::new(Slot::new(ResourceKey::scan(), &Handle::current()))
    }

    #[tokio::test]
    async fn complete_releases_waiter() {
        let slot = slot();
        let cycle = slot.begin(OperationKind::ReadRssi, None).unwrap();
        assert!(slot.is_in_flight(OperationKind::ReadRssi));

        assert!(slot.complete(OperationKind::ReadRssi, None, Ok(Completion::Rssi(-60))));
        let result = cycle.wait(Some(Duration::from_secs(1))).await.unwrap();

        assert_eq!(result, Completion::Rssi(-60));
        assert!(!slot.is_in_flight(OperationKind::ReadRssi));
    }

    #[tokio::test]
    async fn completion_without_waiter_is_discarded() {
        let slot = slot();
        assert!(!slot.complete(OperationKind::Connect, None, Ok(Completion::Rssi(0))));
    }

    #[tokio::test]
    async fn second_completion_is_discarded() {
        let slot = slot();
        let cycle = slot.begin(OperationKind::ReadRssi, None).unwrap();

        assert!(slot.complete(OperationKind::ReadRssi, None, Ok(Completion::Rssi(-50))));
        assert!(!slot.complete(OperationKind::ReadRssi, None, Ok(Completion::Rssi(-99))));

        let result = cycle.wait(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(result, Completion::Rssi(-50));
    }

    #[tokio::test]
    async fn zero_deadline_times_out_and_slot_is_reusable() {
        let slot = slot();
        let cycle = slot.begin(OperationKind::Connect, None).unwrap();

        let err = cycle.wait(Some(Duration::ZERO)).await.unwrap_err();
        assert_eq!(err, BridgeError::TimedOut(OperationKind::Connect));
        assert!(!slot.is_in_flight(OperationKind::Connect));

        // Late event for the timed-out cycle is discarded.
        assert!(!slot.complete(OperationKind::Connect, None, Ok(Completion::Rssi(0))));

        let cycle = slot.begin(OperationKind::Connect, None).unwrap();
        assert!(slot.complete(OperationKind::Connect, None, Ok(Completion::Rssi(1))));
        assert_eq!(cycle.wait(None).await.unwrap(), Completion::Rssi(1));
    }

    #[tokio::test]
    async fn concurrent_same_kind_is_rejected() {
        let slot = slot();
        let _first = slot.begin(OperationKind::ReadCharacteristic, None).unwrap();
        let second = slot.begin(OperationKind::ReadCharacteristic, None);
        assert!(matches!(
            second,
            Err(BridgeError::AlreadyInProgress(OperationKind::ReadCharacteristic))
        ));

        // Other kinds are independent.
        let _other = slot.begin(OperationKind::WriteCharacteristic, None).unwrap();
    }

    #[tokio::test]
    async fn lanes_only_accept_their_target() {
        let slot = slot();
        let wanted = Uuid::from_u128(1);
        let cycle = slot.begin(OperationKind::ReadCharacteristic, Some(wanted)).unwrap();

        assert!(!slot.complete(
            OperationKind::ReadCharacteristic,
            Some(Uuid::from_u128(2)),
            Ok(Completion::Rssi(0))
        ));
        assert!(slot.is_in_flight(OperationKind::ReadCharacteristic));

        assert!(slot.complete(
            OperationKind::ReadCharacteristic,
            Some(wanted),
            Ok(Completion::Rssi(7))
        ));
        assert_eq!(cycle.wait(None).await.unwrap(), Completion::Rssi(7));
    }

    #[tokio::test]
    async fn transport_failure_is_passed_through() {
        let slot = slot();
        let cycle = slot.begin(OperationKind::Disconnect, None).unwrap();
        let error = TransportError::reported(8, "connection timeout");

        slot.complete(OperationKind::Disconnect, None, Err(error.clone()));
        assert_eq!(cycle.wait(None).await.unwrap_err(), BridgeError::Transport(error));
    }

    #[tokio::test]
    async fn close_surfaces_result_missing() {
        let slot = slot();
        let cycle = slot.begin(OperationKind::DiscoverServices, None).unwrap();

        slot.close();
        let err = cycle.wait(Some(Duration::from_secs(1))).await.unwrap_err();
        assert_eq!(err, BridgeError::ResultMissing(OperationKind::DiscoverServices));
    }

    #[tokio::test]
    async fn dropped_cycle_does_not_clear_a_newer_lane() {
        let slot = slot();
        let first = slot.begin(OperationKind::ReadRssi, None).unwrap();
        slot.complete(OperationKind::ReadRssi, None, Ok(Completion::Rssi(1)));

        let second = slot.begin(OperationKind::ReadRssi, None).unwrap();
        drop(first);
        assert!(slot.is_in_flight(OperationKind::ReadRssi));
        drop(second);
        assert!(!slot.is_in_flight(OperationKind::ReadRssi));
    }
}
