//! Thread-blocking wrapper for callers outside any async runtime.
//!
//! Owns a small multi-thread runtime that hosts the event queues; every call
//! blocks the calling thread until the underlying operation resolves.
//! Calling these methods from inside an async context panics.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use uuid::Uuid;

use crate::central::Central;
use crate::config::CentralConfig;
use crate::error::{BridgeError, Result};
use crate::notification::{NotificationBus, Notifier};
use crate::resource::{Characteristic, Descriptor, Peripheral, PeripheralId, ResourceKey, Service};
use crate::transport::Transport;
use crate::watchdog::Watchdog;

pub struct BlockingCentral {
    // Dropped before the runtime so queue workers are aborted while it is alive.
    central: Central,
    runtime: Runtime,
}

impl BlockingCentral {
    pub fn new(
        config: CentralConfig,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let runtime = build_runtime()?;
        let central = {
            let _guard = runtime.enter();
            Central::new(config, transport, notifier)?
        };
        Ok(Self { central, runtime })
    }

    pub fn with_notification_bus(
        config: CentralConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<(Self, Arc<NotificationBus>)> {
        let bus = Arc::new(NotificationBus::new(config.notification_capacity));
        let central = Self::new(config, transport, bus.clone())?;
        Ok((central, bus))
    }

    /// The async facade this wrapper drives.
    pub fn central(&self) -> &Central {
        &self.central
    }

    pub fn connect(&self, id: &PeripheralId, timeout: Option<Duration>) -> Result<Peripheral> {
        self.runtime.block_on(self.central.connect(id, timeout))
    }

    pub fn disconnect(&self, id: &PeripheralId, timeout: Option<Duration>) -> Result<Peripheral> {
        self.runtime.block_on(self.central.disconnect(id, timeout))
    }

    pub fn read_rssi(&self, id: &PeripheralId, timeout: Option<Duration>) -> Result<i16> {
        self.runtime.block_on(self.central.read_rssi(id, timeout))
    }

    pub fn discover_services(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Service>> {
        self.runtime
            .block_on(self.central.discover_services(id, uuids, timeout))
    }

    pub fn discover_service(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Service> {
        self.runtime
            .block_on(self.central.discover_service(id, uuid, timeout))
    }

    pub fn discover_included_services(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Vec<Service>> {
        self.runtime.block_on(
            self.central
                .discover_included_services(id, uuids, service, timeout),
        )
    }

    pub fn discover_included_service(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Service> {
        self.runtime.block_on(
            self.central
                .discover_included_service(id, uuid, service, timeout),
        )
    }

    pub fn discover_characteristics(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Vec<Characteristic>> {
        self.runtime.block_on(
            self.central
                .discover_characteristics(id, uuids, service, timeout),
        )
    }

    pub fn discover_characteristic(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Characteristic> {
        self.runtime.block_on(
            self.central
                .discover_characteristic(id, uuid, service, timeout),
        )
    }

    pub fn read_characteristic(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Characteristic> {
        self.runtime
            .block_on(self.central.read_characteristic(id, uuid, service, timeout))
    }

    pub fn write_characteristic(
        &self,
        id: &PeripheralId,
        data: &[u8],
        with_response: bool,
        uuid: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Characteristic> {
        self.runtime.block_on(self.central.write_characteristic(
            id,
            data,
            with_response,
            uuid,
            service,
            timeout,
        ))
    }

    pub fn set_notify(
        &self,
        id: &PeripheralId,
        enabled: bool,
        characteristic: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Characteristic> {
        self.runtime.block_on(
            self.central
                .set_notify(id, enabled, characteristic, service, timeout),
        )
    }

    pub fn wait_for_notification(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Characteristic> {
        self.runtime.block_on(
            self.central
                .wait_for_notification(id, characteristic, service, timeout),
        )
    }

    pub fn discover_descriptors(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        characteristic: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Vec<Descriptor>> {
        self.runtime.block_on(
            self.central
                .discover_descriptors(id, uuids, characteristic, service, timeout),
        )
    }

    pub fn discover_descriptor(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        characteristic: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Descriptor> {
        self.runtime.block_on(
            self.central
                .discover_descriptor(id, uuid, characteristic, service, timeout),
        )
    }

    pub fn read_descriptor(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        characteristic: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Descriptor> {
        self.runtime.block_on(
            self.central
                .read_descriptor(id, uuid, characteristic, service, timeout),
        )
    }

    pub fn write_descriptor(
        &self,
        id: &PeripheralId,
        data: &[u8],
        uuid: Uuid,
        characteristic: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Descriptor> {
        self.runtime.block_on(
            self.central
                .write_descriptor(id, data, uuid, characteristic, service, timeout),
        )
    }

    pub fn scan(&self, services: Option<&[Uuid]>, timeout: Option<Duration>) -> Result<()> {
        self.central.scan(services, timeout)
    }

    pub fn stop_scan(&self) -> Result<()> {
        self.central.stop_scan()
    }

    pub fn stop_scan_after(&self, timeout: Duration) -> Result<()> {
        self.runtime.block_on(self.central.stop_scan_after(timeout))
    }

    pub fn retrieve_peripherals<S: AsRef<str>>(&self, identifiers: &[S]) -> Result<Vec<Peripheral>> {
        self.central.retrieve_peripherals(identifiers)
    }

    pub fn retrieve_peripheral(&self, identifier: &str) -> Result<Peripheral> {
        self.central.retrieve_peripheral(identifier)
    }

    pub fn conserve_peripheral(&self, peripheral: Peripheral) -> &Self {
        self.central.conserve_peripheral(peripheral);
        self
    }

    pub fn remove_conserved_peripherals(&self, filter: impl Fn(&ResourceKey) -> bool) -> &Self {
        self.central.remove_conserved_peripherals(filter);
        self
    }

    pub fn conserved_peripherals(&self) -> Vec<Peripheral> {
        self.central.conserved_peripherals()
    }

    pub fn purge(&self, predicate: impl Fn(&ResourceKey) -> bool) -> usize {
        self.central.purge(predicate)
    }

    /// Processes run on the wrapper's runtime; this does not block.
    pub fn add_peripheral_process<F>(&self, id: &PeripheralId, process: F) -> &Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.central.add_peripheral_process(id, process);
        self
    }

    pub fn add_scan_process<F>(&self, process: F) -> &Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.central.add_scan_process(process);
        self
    }

    pub fn start_watchdog(&self, key: impl Into<String>, watchdog: Arc<dyn Watchdog>) -> bool {
        self.central.start_watchdog(key, watchdog)
    }

    pub fn invalidate_watchdog(&self, key: &str) -> bool {
        self.central.invalidate_watchdog(key)
    }

    pub fn is_watchdog_running(&self, key: &str) -> bool {
        self.central.is_watchdog_running(key)
    }
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("gattsync-worker")
        .enable_all()
        .build()
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build runtime");
            BridgeError::Runtime(e.to_string())
        })
}
