//! Call facade over an event-driven transport.
//!
//! Every waiting operation follows the same path: check preconditions against
//! the transport's observable state, begin a cycle on the resource's slot,
//! issue the command, then suspend on the cycle's gate until the routed event
//! arrives or the deadline passes.

mod connection;
mod gatt;
mod process;
mod scan;

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::config::CentralConfig;
use crate::error::{BridgeError, Result, TransportError};
use crate::notification::{NotificationBus, Notifier};
use crate::operation::{Completion, OperationKind};
use crate::registry::Registry;
use crate::resource::{
    AdapterState, Characteristic, Descriptor, Peripheral, PeripheralId, ResourceKey, Service,
};
use crate::router::EventRouter;
use crate::transport::Transport;
use crate::watchdog::WatchdogManager;
use scan::{ScanTimer, lock_scan_timer};

pub struct Central {
    config: CentralConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    router: EventRouter,
    notifier: Arc<dyn Notifier>,
    scan_timer: Arc<Mutex<Option<ScanTimer>>>,
    scan_generation: AtomicU64,
    conserved: DashMap<ResourceKey, Peripheral>,
    watchdogs: WatchdogManager,
}

impl Central {
    /// Bind `transport` to a new central. Must be called inside a tokio runtime;
    /// event queue workers run on it.
    pub fn new(
        config: CentralConfig,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| BridgeError::NoRuntime)?;
        let watchdogs = WatchdogManager::new(runtime.clone());
        let registry = Arc::new(Registry::new(runtime));
        let router = EventRouter::new(&registry, Arc::clone(&notifier));
        transport.bind(router.clone());

        tracing::info!(
            central = %config.name,
            default_timeout = ?config.default_timeout,
            "Central started"
        );

        Ok(Self {
            config,
            transport,
            registry,
            router,
            notifier,
            scan_timer: Arc::new(Mutex::new(None)),
            scan_generation: AtomicU64::new(0),
            conserved: DashMap::new(),
            watchdogs,
        })
    }

    /// Build with a fresh [`NotificationBus`] sized from the config.
    pub fn with_notification_bus(
        config: CentralConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<(Self, Arc<NotificationBus>)> {
        let bus = Arc::new(NotificationBus::new(config.notification_capacity));
        let central = Self::new(config, transport, bus.clone())?;
        Ok((central, bus))
    }

    pub fn config(&self) -> &CentralConfig {
        &self.config
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.transport.adapter_state()
    }

    pub fn is_scanning(&self) -> bool {
        self.transport.is_scanning()
    }

    /// The handle the transport delivers events through.
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn is_in_flight(&self, key: &ResourceKey, kind: OperationKind) -> bool {
        self.registry
            .get(key)
            .is_some_and(|slot| slot.is_in_flight(kind))
    }

    // Peripheral retrieval and conservation.

    /// Peripherals the transport knows among `identifiers`. Identifiers that
    /// are not UUIDs are skipped.
    pub fn retrieve_peripherals<S: AsRef<str>>(&self, identifiers: &[S]) -> Result<Vec<Peripheral>> {
        self.ensure_ready()?;
        let found: Vec<Peripheral> = identifiers
            .iter()
            .filter_map(|s| PeripheralId::parse(s.as_ref()).ok())
            .filter_map(|id| self.transport.peripheral(&id))
            .collect();
        tracing::debug!(requested = identifiers.len(), found = found.len(), "Retrieved peripherals");
        Ok(found)
    }

    pub fn retrieve_peripheral(&self, identifier: &str) -> Result<Peripheral> {
        let id = PeripheralId::parse(identifier)?;
        self.ensure_ready()?;
        self.transport
            .peripheral(&id)
            .ok_or(BridgeError::PeripheralNotFound)
    }

    /// Keep a handle alive on behalf of the application, replacing any
    /// previous handle for the same peripheral.
    pub fn conserve_peripheral(&self, peripheral: Peripheral) -> &Self {
        self.conserved.insert(peripheral.key(), peripheral);
        self
    }

    pub fn remove_conserved_peripherals(&self, filter: impl Fn(&ResourceKey) -> bool) -> &Self {
        self.conserved.retain(|key, _| !filter(key));
        self
    }

    pub fn conserved_peripherals(&self) -> Vec<Peripheral> {
        self.conserved.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Drop the slots whose key matches. In-flight calls on them fail with
    /// [`BridgeError::ResultMissing`].
    pub fn purge(&self, predicate: impl Fn(&ResourceKey) -> bool) -> usize {
        self.registry.purge(predicate)
    }

    // Shared plumbing for the operation modules.

    fn ensure_ready(&self) -> Result<()> {
        let state = self.transport.adapter_state();
        if !state.is_ready() {
            tracing::debug!(?state, "Adapter not ready");
            return Err(BridgeError::NotReady);
        }
        Ok(())
    }

    fn known_peripheral(&self, id: &PeripheralId) -> Result<Peripheral> {
        self.ensure_ready()?;
        self.transport
            .peripheral(id)
            .ok_or(BridgeError::PeripheralNotFound)
    }

    fn connected_peripheral(&self, id: &PeripheralId) -> Result<Peripheral> {
        let peripheral = self.known_peripheral(id)?;
        if !peripheral.is_connected() {
            return Err(BridgeError::PeripheralNotConnected);
        }
        Ok(peripheral)
    }

    fn service_of(&self, id: &PeripheralId, service: Uuid) -> Result<Service> {
        self.connected_peripheral(id)?;
        self.transport
            .service(id, service)
            .ok_or(BridgeError::ServiceNotFound)
    }

    fn characteristic_of(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<Characteristic> {
        self.service_of(id, service)?;
        self.transport
            .characteristic(id, characteristic, service)
            .ok_or(BridgeError::CharacteristicNotFound)
    }

    fn descriptor_of(
        &self,
        id: &PeripheralId,
        descriptor: Uuid,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<Descriptor> {
        self.characteristic_of(id, characteristic, service)?;
        self.transport
            .descriptor(id, descriptor, characteristic, service)
            .ok_or(BridgeError::DescriptorNotFound)
    }

    /// Begin a cycle, issue the command, wait for its completion.
    ///
    /// The cycle is dropped on every exit path, clearing the lane.
    async fn exchange(
        &self,
        key: &ResourceKey,
        kind: OperationKind,
        target: Option<Uuid>,
        timeout: Option<Duration>,
        issue: impl FnOnce(&dyn Transport) -> std::result::Result<(), TransportError>,
    ) -> Result<Completion> {
        let slot = self.registry.get_or_create(key);
        let cycle = slot.begin(kind, target)?;

        if let Err(e) = issue(self.transport.as_ref()) {
            tracing::warn!(%key, %kind, error = %e, "Transport rejected command");
            return Err(e.into());
        }

        cycle.wait(self.config.deadline(timeout)).await
    }

    fn scan_timer(&self) -> MutexGuard<'_, Option<ScanTimer>> {
        lock_scan_timer(&self.scan_timer)
    }
}

/// Unwrap the payload shape an operation expects.
fn expect_shape<T>(kind: OperationKind, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| {
        tracing::error!(%kind, "Completion has the wrong payload shape");
        BridgeError::ResultMissing(kind)
    })
}

impl Drop for Central {
    fn drop(&mut self) {
        if let Some(timer) = self.scan_timer().take() {
            timer.token.cancel();
        }
        self.watchdogs.invalidate_all();
        let purged = self.registry.purge(|_| true);
        tracing::debug!(central = %self.config.name, purged, "Central dropped");
    }
}
