use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::Central;
use crate::error::{BridgeError, Result};
use crate::notification::Notification;
use crate::operation::{Completion, OperationKind};
use crate::resource::ResourceKey;

/// Deferred stop armed by [`Central::scan`] with a timeout.
pub(super) struct ScanTimer {
    generation: u64,
    pub(super) token: CancellationToken,
}

pub(super) fn lock_scan_timer(cell: &Mutex<Option<ScanTimer>>) -> MutexGuard<'_, Option<ScanTimer>> {
    match cell.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Central {
    /// Start scanning. With a `timeout`, the scan stops by itself once it
    /// elapses and `scan-timed-out` is published.
    pub fn scan(&self, services: Option<&[Uuid]>, timeout: Option<Duration>) -> Result<()> {
        self.ensure_ready()?;
        if self.transport.is_scanning() {
            return Err(BridgeError::AlreadyScanning);
        }

        self.transport.start_scan(services)?;
        tracing::info!(services = ?services, timeout = ?timeout, "Scan started");

        if let Some(after) = timeout {
            self.arm_scan_timer(after);
        }
        Ok(())
    }

    /// Stop scanning. If a [`stop_scan_after`](Self::stop_scan_after) call is
    /// waiting, it is released instead and performs the stop itself.
    pub fn stop_scan(&self) -> Result<()> {
        self.cancel_scan_timer();

        let slot = self.registry.get_or_create(&ResourceKey::scan());
        if slot.complete(OperationKind::StopScan, None, Ok(Completion::ScanStopped)) {
            tracing::debug!("Released pending stop_scan_after");
            return Ok(());
        }
        self.halt_scan()
    }

    /// Let the scan run for `timeout`, then stop it and publish
    /// `scan-timed-out`. Returns early if [`stop_scan`](Self::stop_scan) is
    /// called meanwhile, still publishing. If the scan was already stopped by
    /// the timer armed in [`scan`](Self::scan), returns without publishing again.
    pub async fn stop_scan_after(&self, timeout: Duration) -> Result<()> {
        let slot = self.registry.get_or_create(&ResourceKey::scan());
        let cycle = slot.begin(OperationKind::StopScan, None)?;

        match cycle.wait(Some(timeout)).await {
            Ok(_) => tracing::debug!("stop_scan_after released early"),
            Err(BridgeError::TimedOut(_)) => {}
            Err(e) => return Err(e),
        }

        if !self.transport.is_scanning() {
            tracing::debug!("Scan already stopped");
            return Ok(());
        }
        let stopped = self.halt_scan();
        tracing::info!("Scan timed out");
        self.notifier.publish(Notification::ScanTimedOut);
        stopped
    }

    fn halt_scan(&self) -> Result<()> {
        self.ensure_ready()?;
        if !self.transport.is_scanning() {
            return Err(BridgeError::ScanningNotActive);
        }
        self.transport.stop_scan()?;
        tracing::info!("Scan stopped");
        Ok(())
    }

    fn arm_scan_timer(&self, after: Duration) {
        let generation = self.scan_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let armed = ScanTimer {
            generation,
            token: token.clone(),
        };
        if let Some(previous) = self.scan_timer().replace(armed) {
            previous.token.cancel();
        }

        let cell = Arc::clone(&self.scan_timer);
        let registry = Arc::downgrade(&self.registry);
        let transport = Arc::clone(&self.transport);
        let notifier = Arc::clone(&self.notifier);
        self.registry.runtime().spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Scan timer cancelled");
                }
                _ = tokio::time::sleep(after) => {
                    // Disarm only if no newer timer replaced this one.
                    {
                        let mut current = lock_scan_timer(&cell);
                        if current.as_ref().is_some_and(|t| t.generation == generation) {
                            current.take();
                        }
                    }

                    if transport.is_scanning()
                        && let Err(e) = transport.stop_scan()
                    {
                        tracing::warn!(error = %e, "Failed to stop scan on timeout");
                    }
                    tracing::info!(?after, "Scan timed out");
                    notifier.publish(Notification::ScanTimedOut);

                    // A waiting stop_scan_after finds the scan stopped and stays quiet.
                    if let Some(registry) = registry.upgrade()
                        && let Some(slot) = registry.get(&ResourceKey::scan())
                        && slot.complete(OperationKind::StopScan, None, Ok(Completion::ScanStopped))
                    {
                        tracing::debug!("Scan timer released pending stop_scan_after");
                    }
                }
            }
        });
    }

    fn cancel_scan_timer(&self) {
        if let Some(timer) = self.scan_timer().take() {
            timer.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::super::tests::{BATTERY_SERVICE, battery_peripheral, central_with};
    use crate::error::BridgeError;
    use crate::notification::Notification;
    use crate::operation::OperationKind;
    use crate::resource::{AdapterState, ResourceKey};
    use crate::sim::{Command, SimulatedTransport};

    #[tokio::test]
    async fn scan_reports_discovered_peripherals() {
        let sim = SimulatedTransport::new();
        let id = sim.add_peripheral(battery_peripheral("sensor"));
        let (central, bus) = central_with(&sim);
        let mut rx = bus.subscribe();

        central.scan(Some(&[BATTERY_SERVICE][..]), None).unwrap();
        assert!(central.is_scanning());

        let note = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match note {
            Notification::PeripheralDiscovered { advertisement } => {
                assert_eq!(advertisement.peripheral.id, id);
                assert!(advertisement.data.service_uuids.contains(&BATTERY_SERVICE));
            }
            other => panic!("unexpected notification: {other:?}"),
        }
        assert_eq!(sim.commands(), vec![Command::StartScan(Some(vec![BATTERY_SERVICE]))]);
    }

    #[tokio::test]
    async fn scan_preconditions() {
        let sim = SimulatedTransport::new();
        let (central, _bus) = central_with(&sim);

        assert_eq!(central.stop_scan(), Err(BridgeError::ScanningNotActive));
        central.scan(None, None).unwrap();
        assert_eq!(central.scan(None, None), Err(BridgeError::AlreadyScanning));

        sim.set_adapter_state(AdapterState::PoweredOff);
        assert_eq!(central.stop_scan(), Err(BridgeError::NotReady));
    }

    #[tokio::test]
    async fn scan_timer_stops_and_publishes() {
        let sim = SimulatedTransport::new();
        let (central, bus) = central_with(&sim);
        let mut rx = bus.subscribe();

        central.scan(None, Some(Duration::from_millis(20))).unwrap();
        let note = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(note, Notification::ScanTimedOut);
        assert!(!central.is_scanning());
    }

    #[tokio::test]
    async fn stop_scan_cancels_the_timer() {
        let sim = SimulatedTransport::new();
        let (central, bus) = central_with(&sim);
        let mut rx = bus.subscribe();

        central.scan(None, Some(Duration::from_millis(20))).unwrap();
        central.stop_scan().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(rx.try_recv().is_err());
        assert!(!central.is_scanning());
    }

    #[tokio::test]
    async fn stop_scan_after_deadline_publishes_timeout() {
        let sim = SimulatedTransport::new();
        let (central, bus) = central_with(&sim);
        let mut rx = bus.subscribe();

        central.scan(None, None).unwrap();
        central.stop_scan_after(Duration::from_millis(10)).await.unwrap();

        assert!(!central.is_scanning());
        assert_eq!(rx.try_recv().unwrap(), Notification::ScanTimedOut);
    }

    #[tokio::test]
    async fn stop_scan_releases_stop_scan_after_early() {
        let sim = SimulatedTransport::new();
        let (central, bus) = central_with(&sim);
        let central = Arc::new(central);
        let mut rx = bus.subscribe();
        central.scan(None, None).unwrap();

        let waiter = {
            let central = Arc::clone(&central);
            tokio::spawn(async move { central.stop_scan_after(Duration::from_secs(30)).await })
        };
        while !central.is_in_flight(&ResourceKey::scan(), OperationKind::StopScan) {
            tokio::task::yield_now().await;
        }

        central.stop_scan().unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(!central.is_scanning());
        assert_eq!(rx.try_recv().unwrap(), Notification::ScanTimedOut);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fired_timer_disarms_and_releases_stop_scan_after_once() {
        let sim = SimulatedTransport::new();
        let (central, bus) = central_with(&sim);
        let central = Arc::new(central);
        let mut rx = bus.subscribe();
        central.scan(None, Some(Duration::from_millis(20))).unwrap();

        let waiter = {
            let central = Arc::clone(&central);
            tokio::spawn(async move { central.stop_scan_after(Duration::from_secs(30)).await })
        };
        while !central.is_in_flight(&ResourceKey::scan(), OperationKind::StopScan) {
            tokio::task::yield_now().await;
        }

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Ok(()));
        assert!(!central.is_scanning());
        assert!(central.scan_timer().is_none());

        assert_eq!(rx.try_recv().unwrap(), Notification::ScanTimedOut);
        assert!(rx.try_recv().is_err());
        assert_eq!(sim.commands(), vec![Command::StartScan(None), Command::StopScan]);
    }

    #[tokio::test]
    async fn rearming_replaces_the_previous_timer() {
        let sim = SimulatedTransport::new();
        let (central, bus) = central_with(&sim);
        let mut rx = bus.subscribe();

        central.scan(None, Some(Duration::from_millis(10))).unwrap();
        central.stop_scan().unwrap();
        central.scan(None, Some(Duration::from_secs(30))).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // The cancelled short timer neither stopped the new scan nor disarmed its timer.
        assert!(central.is_scanning());
        assert!(central.scan_timer().is_some());
        assert!(rx.try_recv().is_err());
    }
}
