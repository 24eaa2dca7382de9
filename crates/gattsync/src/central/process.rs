//! Application work scheduled through the central.
//!
//! Processes on the same resource run one after another; processes on
//! different resources run in parallel. A process that needs the central
//! captures an `Arc<Central>` and awaits its calls like any other caller.
//! Watchdogs are keyed periodic tasks that live as long as the central.

use std::future::Future;
use std::sync::Arc;

use super::Central;
use crate::resource::{PeripheralId, ResourceKey};
use crate::watchdog::Watchdog;

impl Central {
    /// Queue `process` behind earlier processes for `id`.
    pub fn add_peripheral_process<F>(&self, id: &PeripheralId, process: F) -> &Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.add_process(&id.key(), process)
    }

    /// Queue `process` behind earlier scan processes.
    pub fn add_scan_process<F>(&self, process: F) -> &Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.add_process(&ResourceKey::scan(), process)
    }

    fn add_process<F>(&self, key: &ResourceKey, process: F) -> &Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let slot = self.registry.get_or_create(key);
        if slot.add_process(process) {
            tracing::debug!(%key, "Process queued");
        }
        self
    }

    /// Start `watchdog` under `key`, replacing any watchdog running there.
    /// Returns `false` if its interval is zero.
    pub fn start_watchdog(&self, key: impl Into<String>, watchdog: Arc<dyn Watchdog>) -> bool {
        self.watchdogs.start(key, watchdog)
    }

    pub fn invalidate_watchdog(&self, key: &str) -> bool {
        self.watchdogs.invalidate(key)
    }

    pub fn is_watchdog_running(&self, key: &str) -> bool {
        self.watchdogs.is_running(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, oneshot};

    use crate::central::Central;
    use crate::central::tests::{BATTERY_LEVEL, BATTERY_SERVICE, battery_peripheral, central_with};
    use crate::error::Result;
    use crate::resource::{Characteristic, PeripheralId, ResourceKey};
    use crate::notification::Notification;
    use crate::sim::SimulatedTransport;
    use crate::watchdog::Watchdog;

    #[tokio::test]
    async fn same_peripheral_processes_run_serially() {
        let sim = SimulatedTransport::new();
        let id = sim.add_peripheral(battery_peripheral("a"));
        let (central, _bus) = central_with(&sim);
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let log = Arc::clone(&log);
            central.add_peripheral_process(&id, async move {
                log.lock().unwrap().push(format!("{name} start"));
                tokio::time::sleep(Duration::from_millis(10)).await;
                log.lock().unwrap().push(format!("{name} end"));
            });
        }
        let (done_tx, done_rx) = oneshot::channel();
        central.add_peripheral_process(&id, async move {
            let _ = done_tx.send(());
        });
        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first start", "first end", "second start", "second end"]
        );
    }

    #[tokio::test]
    async fn different_peripherals_run_in_parallel() {
        let sim = SimulatedTransport::new();
        let a = sim.add_peripheral(battery_peripheral("a"));
        let b = sim.add_peripheral(battery_peripheral("b"));
        let (central, _bus) = central_with(&sim);

        // Each process waits for the other to start.
        let (a_tx, mut a_rx) = mpsc::channel::<()>(1);
        let (b_tx, mut b_rx) = mpsc::channel::<()>(1);
        let (done_tx, mut done_rx) = mpsc::channel::<&'static str>(2);

        let done = done_tx.clone();
        central.add_peripheral_process(&a, async move {
            let _ = a_tx.send(()).await;
            b_rx.recv().await;
            let _ = done.send("a").await;
        });
        central.add_peripheral_process(&b, async move {
            let _ = b_tx.send(()).await;
            a_rx.recv().await;
            let _ = done_tx.send("b").await;
        });

        let mut finished = Vec::new();
        for _ in 0..2 {
            let name = tokio::time::timeout(Duration::from_secs(1), done_rx.recv())
                .await
                .unwrap()
                .unwrap();
            finished.push(name);
        }
        finished.sort();
        assert_eq!(finished, vec!["a", "b"]);
    }

    async fn read_level(central: &Central, id: &PeripheralId) -> Result<Characteristic> {
        central.connect(id, None).await?;
        central.discover_service(id, BATTERY_SERVICE, None).await?;
        central
            .discover_characteristic(id, BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await?;
        central
            .read_characteristic(id, BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await
    }

    #[tokio::test]
    async fn process_awaits_central_calls() {
        let sim = SimulatedTransport::new();
        let id = sim.add_peripheral(battery_peripheral("a"));
        let (central, _bus) = central_with(&sim);
        let central = Arc::new(central);

        let (tx, rx) = oneshot::channel();
        let worker = Arc::clone(&central);
        central.add_peripheral_process(&id, async move {
            let level = read_level(&worker, &id).await;
            let _ = tx.send(level.map(|c| c.value));
        });

        let value = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, Ok(Some(vec![87])));
    }

    #[tokio::test]
    async fn scan_processes_share_the_scan_slot() {
        let sim = SimulatedTransport::new();
        let (central, _bus) = central_with(&sim);
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = Arc::clone(&log);
            central.add_scan_process(async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                log.lock().unwrap().push(i);
            });
        }
        let (done_tx, done_rx) = oneshot::channel();
        central.add_scan_process(async move {
            let _ = done_tx.send(());
        });
        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert!(central.registry.contains(&ResourceKey::scan()));
    }

    #[tokio::test]
    async fn purged_peripheral_drops_pending_processes() {
        let sim = SimulatedTransport::new();
        let id = sim.add_peripheral(battery_peripheral("a"));
        let (central, _bus) = central_with(&sim);

        let (started_tx, started_rx) = oneshot::channel();
        let (_hold_tx, hold_rx) = oneshot::channel::<()>();
        central.add_peripheral_process(&id, async move {
            let _ = started_tx.send(());
            let _ = hold_rx.await;
        });
        started_rx.await.unwrap();

        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        central.add_peripheral_process(&id, async move { *flag.lock().unwrap() = true });
        central.purge(|key| *key == id.key());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!*ran.lock().unwrap());
    }

    /// Polls RSSI through the central on every tick.
    struct RssiWatch {
        central: Arc<Central>,
        id: PeripheralId,
        readings: mpsc::UnboundedSender<i16>,
    }

    #[async_trait]
    impl Watchdog for RssiWatch {
        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn tick(&self) {
            if let Ok(rssi) = self.central.read_rssi(&self.id, None).await {
                let _ = self.readings.send(rssi);
            }
        }
    }

    #[tokio::test]
    async fn watchdog_polls_through_the_central() {
        let sim = SimulatedTransport::new();
        let id = sim.add_peripheral(battery_peripheral("a"));
        let (central, _bus) = central_with(&sim);
        let central = Arc::new(central);
        central.connect(&id, None).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let watch = Arc::new(RssiWatch {
            central: Arc::clone(&central),
            id,
            readings: tx,
        });
        assert!(central.start_watchdog(id.to_string(), watch));
        assert!(central.is_watchdog_running(&id.to_string()));

        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
        }

        assert!(central.invalidate_watchdog(&id.to_string()));
        assert!(!central.is_watchdog_running(&id.to_string()));
        assert!(!central.invalidate_watchdog(&id.to_string()));
    }

    struct ScanKick {
        central: Arc<Central>,
    }

    #[async_trait]
    impl Watchdog for ScanKick {
        fn interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn tick(&self) {
            let _ = self.central.scan(None, Some(Duration::from_millis(5)));
        }
    }

    #[tokio::test]
    async fn first_watchdog_tick_is_immediate() {
        let sim = SimulatedTransport::new();
        let (central, bus) = central_with(&sim);
        let central = Arc::new(central);
        let mut rx = bus.subscribe();

        central.start_watchdog("scan", Arc::new(ScanKick { central: Arc::clone(&central) }));

        let notification = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification, Notification::ScanTimedOut);
        central.invalidate_watchdog("scan");
    }
}
