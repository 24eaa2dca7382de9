//! In-memory transport for tests and the demo binary.
//!
//! Commands are recorded, then completed from a dedicated callback thread
//! after a configurable latency, the way a real stack calls back from its own
//! dispatch queue. State changes (connected, notifying, written values) are
//! applied when the completion fires, not when the command is issued.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportError;
use crate::resource::{
    AdapterState, Advertisement, AdvertisementData, Characteristic, ConnectionState, Descriptor,
    Peripheral, PeripheralId, Service,
};
use crate::router::EventRouter;
use crate::transport::{Transport, TransportEvent, WriteType};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SimError {
    #[error("unknown peripheral {0}")]
    UnknownPeripheral(PeripheralId),
    #[error("unknown service {0}")]
    UnknownService(Uuid),
    #[error("unknown characteristic {0}")]
    UnknownCharacteristic(Uuid),
}

/// A command the transport accepted, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum Command {
    StartScan(Option<Vec<Uuid>>),
    StopScan,
    Connect(PeripheralId),
    Disconnect(PeripheralId),
    ReadRssi(PeripheralId),
    DiscoverServices {
        peripheral: PeripheralId,
        filter: Option<Vec<Uuid>>,
    },
    DiscoverIncludedServices {
        peripheral: PeripheralId,
        service: Uuid,
        filter: Option<Vec<Uuid>>,
    },
    DiscoverCharacteristics {
        peripheral: PeripheralId,
        service: Uuid,
        filter: Option<Vec<Uuid>>,
    },
    DiscoverDescriptors {
        peripheral: PeripheralId,
        characteristic: Uuid,
        filter: Option<Vec<Uuid>>,
    },
    ReadCharacteristic {
        peripheral: PeripheralId,
        characteristic: Uuid,
    },
    WriteCharacteristic {
        peripheral: PeripheralId,
        characteristic: Uuid,
        data: Vec<u8>,
        write_type: WriteType,
    },
    SetNotify {
        peripheral: PeripheralId,
        characteristic: Uuid,
        enabled: bool,
    },
    ReadDescriptor {
        peripheral: PeripheralId,
        descriptor: Uuid,
    },
    WriteDescriptor {
        peripheral: PeripheralId,
        descriptor: Uuid,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct SimDescriptor {
    uuid: Uuid,
    value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SimCharacteristic {
    uuid: Uuid,
    value: Vec<u8>,
    notifying: bool,
    descriptors: Vec<SimDescriptor>,
    descriptors_discovered: bool,
}

impl SimCharacteristic {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            value: Vec::new(),
            notifying: false,
            descriptors: Vec::new(),
            descriptors_discovered: false,
        }
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_descriptor(mut self, uuid: Uuid, value: impl Into<Vec<u8>>) -> Self {
        self.descriptors.push(SimDescriptor {
            uuid,
            value: value.into(),
        });
        self
    }

    fn snapshot(&self, service: Uuid) -> Characteristic {
        Characteristic {
            uuid: self.uuid,
            service_uuid: service,
            value: Some(self.value.clone()),
            is_notifying: self.notifying,
        }
    }

    fn descriptor(&self, uuid: Uuid) -> Option<&SimDescriptor> {
        self.descriptors.iter().find(|d| d.uuid == uuid)
    }
}

impl SimDescriptor {
    fn snapshot(&self, characteristic: Uuid, service: Uuid) -> Descriptor {
        Descriptor {
            uuid: self.uuid,
            characteristic_uuid: characteristic,
            service_uuid: service,
            value: Some(self.value.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimService {
    uuid: Uuid,
    included: Vec<Uuid>,
    characteristics: Vec<SimCharacteristic>,
    characteristics_discovered: bool,
}

impl SimService {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            included: Vec::new(),
            characteristics: Vec::new(),
            characteristics_discovered: false,
        }
    }

    pub fn with_characteristic(mut self, characteristic: SimCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    pub fn with_included(mut self, service: Uuid) -> Self {
        self.included.push(service);
        self
    }

    fn characteristic_mut(&mut self, uuid: Uuid) -> Option<&mut SimCharacteristic> {
        self.characteristics.iter_mut().find(|c| c.uuid == uuid)
    }
}

#[derive(Debug, Clone)]
pub struct SimPeripheral {
    id: PeripheralId,
    name: String,
    state: ConnectionState,
    rssi: i16,
    reachable: bool,
    services: Vec<SimService>,
    services_discovered: bool,
}

impl SimPeripheral {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PeripheralId::random(),
            name: name.into(),
            state: ConnectionState::Disconnected,
            rssi: -55,
            reachable: true,
            services: Vec::new(),
            services_discovered: false,
        }
    }

    pub fn with_service(mut self, service: SimService) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    /// Start out already connected.
    pub fn connected(mut self) -> Self {
        self.state = ConnectionState::Connected;
        self
    }

    /// Connection attempts fail.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn id(&self) -> PeripheralId {
        self.id
    }

    fn snapshot(&self) -> Peripheral {
        Peripheral {
            id: self.id,
            name: Some(self.name.clone()),
            state: self.state,
        }
    }

    fn advertisement(&self) -> Advertisement {
        let data = AdvertisementData {
            local_name: Some(self.name.clone()),
            service_uuids: self.services.iter().map(|s| s.uuid).collect(),
            is_connectable: Some(self.reachable),
            ..AdvertisementData::default()
        };
        Advertisement::new(self.snapshot(), data, self.rssi)
    }

    fn service_mut(&mut self, uuid: Uuid) -> Option<&mut SimService> {
        self.services.iter_mut().find(|s| s.uuid == uuid)
    }

    fn characteristic_mut(&mut self, uuid: Uuid, service: Uuid) -> Option<&mut SimCharacteristic> {
        self.service_mut(service)?.characteristic_mut(uuid)
    }

    /// Forget discovered attributes, as a real stack does after a disconnect.
    fn reset_discovery(&mut self) {
        self.services_discovered = false;
        for service in &mut self.services {
            service.characteristics_discovered = false;
            for characteristic in &mut service.characteristics {
                characteristic.descriptors_discovered = false;
                characteristic.notifying = false;
            }
        }
    }
}

struct SimState {
    adapter: AdapterState,
    scanning: bool,
    silent: bool,
    rejecting: bool,
    latency: Duration,
    peripherals: BTreeMap<PeripheralId, SimPeripheral>,
    commands: Vec<Command>,
}

impl SimState {
    fn peripheral(&self, id: &PeripheralId) -> Option<&SimPeripheral> {
        self.peripherals.get(id)
    }

    fn peripheral_mut(&mut self, id: &PeripheralId) -> Option<&mut SimPeripheral> {
        self.peripherals.get_mut(id)
    }
}

/// Mutates state when a completion fires and yields the event to deliver.
type Action = Box<dyn FnOnce(&mut SimState) -> Option<TransportEvent> + Send>;

struct Scheduled {
    due: Instant,
    seq: u64,
    action: Action,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.due, self.seq) == (other.due, other.seq)
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the max-heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

struct SimInner {
    state: Mutex<SimState>,
    router: Mutex<Option<EventRouter>>,
    callbacks: Mutex<Option<mpsc::Sender<Scheduled>>>,
    next_seq: std::sync::atomic::AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SimInner {
    fn state(&self) -> MutexGuard<'_, SimState> {
        lock(&self.state)
    }

    fn fire(&self, action: Action) {
        let event = action(&mut self.state());
        let Some(event) = event else {
            return;
        };
        let router = lock(&self.router).clone();
        match router {
            Some(router) => router.deliver(event),
            None => tracing::debug!(event = event.name(), "No router bound - dropping event"),
        }
    }
}

/// Cloning shares the same simulated adapter.
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<SimInner>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    /// A powered-on adapter with no peripherals.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SimInner {
                state: Mutex::new(SimState {
                    adapter: AdapterState::PoweredOn,
                    scanning: false,
                    silent: false,
                    rejecting: false,
                    latency: Duration::ZERO,
                    peripherals: BTreeMap::new(),
                    commands: Vec::new(),
                }),
                router: Mutex::new(None),
                callbacks: Mutex::new(None),
                next_seq: std::sync::atomic::AtomicU64::new(0),
            }),
        }
    }

    pub fn add_peripheral(&self, peripheral: SimPeripheral) -> PeripheralId {
        let id = peripheral.id;
        self.inner.state().peripherals.insert(id, peripheral);
        id
    }

    /// Change adapter state and report it, as a real stack would.
    pub fn set_adapter_state(&self, adapter: AdapterState) {
        {
            let mut state = self.inner.state();
            state.adapter = adapter;
            if !adapter.is_ready() {
                state.scanning = false;
            }
        }
        self.inject(TransportEvent::AdapterStateChanged { state: adapter });
    }

    /// Accept commands but never complete them.
    pub fn set_silent(&self, silent: bool) {
        self.inner.state().silent = silent;
    }

    /// Refuse every command synchronously.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.inner.state().rejecting = rejecting;
    }

    /// Delay between accepting a command and completing it.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.state().latency = latency;
    }

    pub fn set_connection_state(
        &self,
        id: &PeripheralId,
        connection: ConnectionState,
    ) -> Result<(), SimError> {
        let mut state = self.inner.state();
        let peripheral = state
            .peripheral_mut(id)
            .ok_or(SimError::UnknownPeripheral(*id))?;
        peripheral.state = connection;
        Ok(())
    }

    pub fn peripheral_snapshot(&self, id: &PeripheralId) -> Option<Peripheral> {
        self.inner.state().peripheral(id).map(SimPeripheral::snapshot)
    }

    pub fn commands(&self) -> Vec<Command> {
        self.inner.state().commands.clone()
    }

    /// Deliver a raw event on the callback thread, bypassing the simulation.
    pub fn inject(&self, event: TransportEvent) {
        self.schedule(Duration::ZERO, Box::new(move |_: &mut SimState| Some(event)));
    }

    /// Change a characteristic's value and notify it.
    pub fn notify_value(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        service: Uuid,
        value: impl Into<Vec<u8>>,
    ) -> Result<(), SimError> {
        let value = value.into();
        let (peripheral, delay) = {
            let mut state = self.inner.state();
            let delay = state.latency;
            let sim = state
                .peripheral_mut(id)
                .ok_or(SimError::UnknownPeripheral(*id))?;
            let sim_service = sim
                .service_mut(service)
                .ok_or(SimError::UnknownService(service))?;
            sim_service
                .characteristic_mut(characteristic)
                .ok_or(SimError::UnknownCharacteristic(characteristic))?;
            (*id, delay)
        };

        self.schedule(
            delay,
            Box::new(move |state: &mut SimState| {
                let c = state
                    .peripheral_mut(&peripheral)?
                    .characteristic_mut(characteristic, service)?;
                c.value = value;
                Some(TransportEvent::CharacteristicValueUpdated {
                    peripheral,
                    characteristic: c.snapshot(service),
                    error: None,
                })
            }),
        );
        Ok(())
    }

    /// Drop the link from the peripheral side.
    pub fn drop_connection(
        &self,
        id: &PeripheralId,
        error: Option<TransportError>,
    ) -> Result<(), SimError> {
        if self.inner.state().peripheral(id).is_none() {
            return Err(SimError::UnknownPeripheral(*id));
        }
        let id = *id;
        self.schedule(
            Duration::ZERO,
            Box::new(move |state: &mut SimState| {
                let sim = state.peripheral_mut(&id)?;
                sim.state = ConnectionState::Disconnected;
                sim.reset_discovery();
                Some(TransportEvent::Disconnected {
                    peripheral: sim.snapshot(),
                    error,
                })
            }),
        );
        Ok(())
    }

    fn schedule(&self, delay: Duration, action: Action) {
        let seq = self
            .inner
            .next_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let item = Scheduled {
            due: Instant::now() + delay,
            seq,
            action,
        };

        let mut callbacks = lock(&self.inner.callbacks);
        let tx = callbacks.get_or_insert_with(|| spawn_callback_thread(Arc::downgrade(&self.inner)));
        if let Err(mpsc::SendError(item)) = tx.send(item) {
            // Callback thread died; run inline rather than lose the event.
            tracing::warn!("Sim callback thread gone - firing inline");
            drop(callbacks);
            self.inner.fire(item.action);
        }
    }

    /// Record an accepted command and schedule its completion.
    fn submit(
        &self,
        command: Command,
        action: impl FnOnce(&mut SimState) -> Option<TransportEvent> + Send + 'static,
    ) -> Result<(), TransportError> {
        let delay = {
            let mut state = self.inner.state();
            if state.rejecting {
                return Err(TransportError::rejected("simulated adapter refused the command"));
            }
            state.commands.push(command);
            if state.silent {
                return Ok(());
            }
            state.latency
        };
        self.schedule(delay, Box::new(action));
        Ok(())
    }
}

fn spawn_callback_thread(inner: Weak<SimInner>) -> mpsc::Sender<Scheduled> {
    let (tx, rx) = mpsc::channel::<Scheduled>();
    let spawned = std::thread::Builder::new()
        .name("sim-callbacks".to_string())
        .spawn(move || run_callbacks(inner, rx));
    if let Err(e) = spawned {
        tracing::error!(error = %e, "Failed to spawn sim callback thread");
    }
    tx
}

fn run_callbacks(inner: Weak<SimInner>, rx: mpsc::Receiver<Scheduled>) {
    let mut pending = BinaryHeap::new();
    loop {
        let received = match pending.peek() {
            Some(next) => {
                let Scheduled { due, .. } = next;
                rx.recv_timeout(due.saturating_duration_since(Instant::now()))
            }
            None => rx.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(item) => pending.push(item),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }

        let now = Instant::now();
        while pending.peek().is_some_and(|next| next.due <= now) {
            let Some(item) = pending.pop() else {
                break;
            };
            let Some(inner) = inner.upgrade() else {
                return;
            };
            inner.fire(item.action);
        }
    }
}

impl Transport for SimulatedTransport {
    fn bind(&self, router: EventRouter) {
        *lock(&self.inner.router) = Some(router);
    }

    fn adapter_state(&self) -> AdapterState {
        self.inner.state().adapter
    }

    fn is_scanning(&self) -> bool {
        self.inner.state().scanning
    }

    fn peripheral(&self, id: &PeripheralId) -> Option<Peripheral> {
        self.peripheral_snapshot(id)
    }

    fn service(&self, id: &PeripheralId, service: Uuid) -> Option<Service> {
        let state = self.inner.state();
        let sim = state.peripheral(id)?;
        if !sim.services_discovered {
            return None;
        }
        sim.services
            .iter()
            .find(|s| s.uuid == service)
            .map(|s| Service::primary(s.uuid))
    }

    fn characteristic(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        service: Uuid,
    ) -> Option<Characteristic> {
        let state = self.inner.state();
        let sim = state.peripheral(id)?;
        let sim_service = sim.services.iter().find(|s| s.uuid == service)?;
        if !sim.services_discovered || !sim_service.characteristics_discovered {
            return None;
        }
        sim_service
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
            .map(|c| c.snapshot(service))
    }

    fn descriptor(
        &self,
        id: &PeripheralId,
        descriptor: Uuid,
        characteristic: Uuid,
        service: Uuid,
    ) -> Option<Descriptor> {
        let state = self.inner.state();
        let sim = state.peripheral(id)?;
        let c = sim
            .services
            .iter()
            .find(|s| s.uuid == service && s.characteristics_discovered)?
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)?;
        if !c.descriptors_discovered {
            return None;
        }
        c.descriptor(descriptor)
            .map(|d| d.snapshot(characteristic, service))
    }

    fn start_scan(&self, services: Option<&[Uuid]>) -> Result<(), TransportError> {
        let filter = services.map(<[Uuid]>::to_vec);
        {
            let mut state = self.inner.state();
            if state.rejecting {
                return Err(TransportError::rejected("simulated adapter refused to scan"));
            }
            state.scanning = true;
            state.commands.push(Command::StartScan(filter.clone()));
        }

        let (found, delay) = {
            let state = self.inner.state();
            let found: Vec<Advertisement> = state
                .peripherals
                .values()
                .filter(|p| match &filter {
                    Some(wanted) => p.services.iter().any(|s| wanted.contains(&s.uuid)),
                    None => true,
                })
                .map(SimPeripheral::advertisement)
                .collect();
            (found, state.latency)
        };

        for advertisement in found {
            self.schedule(
                delay,
                Box::new(move |state: &mut SimState| {
                    state
                        .scanning
                        .then_some(TransportEvent::PeripheralDiscovered { advertisement })
                }),
            );
        }
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), TransportError> {
        let mut state = self.inner.state();
        if state.rejecting {
            return Err(TransportError::rejected("simulated adapter refused to stop scanning"));
        }
        state.scanning = false;
        state.commands.push(Command::StopScan);
        Ok(())
    }

    fn connect(&self, id: &PeripheralId) -> Result<(), TransportError> {
        let id = *id;
        self.submit(Command::Connect(id), move |state| {
            let sim = state.peripheral_mut(&id)?;
            if !sim.reachable {
                return Some(TransportEvent::ConnectFailed {
                    peripheral: sim.snapshot(),
                    error: Some(TransportError::reported(14, "peripheral unreachable")),
                });
            }
            sim.state = ConnectionState::Connected;
            Some(TransportEvent::Connected {
                peripheral: sim.snapshot(),
            })
        })
    }

    fn disconnect(&self, id: &PeripheralId) -> Result<(), TransportError> {
        let id = *id;
        self.submit(Command::Disconnect(id), move |state| {
            let sim = state.peripheral_mut(&id)?;
            sim.state = ConnectionState::Disconnected;
            sim.reset_discovery();
            Some(TransportEvent::Disconnected {
                peripheral: sim.snapshot(),
                error: None,
            })
        })
    }

    fn read_rssi(&self, id: &PeripheralId) -> Result<(), TransportError> {
        let id = *id;
        self.submit(Command::ReadRssi(id), move |state| {
            let sim = state.peripheral(&id)?;
            Some(TransportEvent::RssiRead {
                peripheral: id,
                rssi: sim.rssi,
                error: None,
            })
        })
    }

    fn discover_services(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
    ) -> Result<(), TransportError> {
        let id = *id;
        let command = Command::DiscoverServices {
            peripheral: id,
            filter: uuids.map(<[Uuid]>::to_vec),
        };
        self.submit(command, move |state| {
            let sim = state.peripheral_mut(&id)?;
            sim.services_discovered = true;
            Some(TransportEvent::ServicesDiscovered {
                peripheral: id,
                services: sim.services.iter().map(|s| Service::primary(s.uuid)).collect(),
                error: None,
            })
        })
    }

    fn discover_included_services(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        service: Uuid,
    ) -> Result<(), TransportError> {
        let id = *id;
        let command = Command::DiscoverIncludedServices {
            peripheral: id,
            service,
            filter: uuids.map(<[Uuid]>::to_vec),
        };
        self.submit(command, move |state| {
            let sim_service = state.peripheral_mut(&id)?.service_mut(service)?;
            let services = sim_service
                .included
                .iter()
                .map(|uuid| Service {
                    uuid: *uuid,
                    is_primary: false,
                })
                .collect();
            Some(TransportEvent::IncludedServicesDiscovered {
                peripheral: id,
                service,
                services,
                error: None,
            })
        })
    }

    fn discover_characteristics(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        service: Uuid,
    ) -> Result<(), TransportError> {
        let id = *id;
        let command = Command::DiscoverCharacteristics {
            peripheral: id,
            service,
            filter: uuids.map(<[Uuid]>::to_vec),
        };
        self.submit(command, move |state| {
            let sim_service = state.peripheral_mut(&id)?.service_mut(service)?;
            sim_service.characteristics_discovered = true;
            let characteristics = sim_service
                .characteristics
                .iter()
                .map(|c| c.snapshot(service))
                .collect();
            Some(TransportEvent::CharacteristicsDiscovered {
                peripheral: id,
                service,
                characteristics,
                error: None,
            })
        })
    }

    fn discover_descriptors(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<(), TransportError> {
        let id = *id;
        let command = Command::DiscoverDescriptors {
            peripheral: id,
            characteristic,
            filter: uuids.map(<[Uuid]>::to_vec),
        };
        self.submit(command, move |state| {
            let c = state
                .peripheral_mut(&id)?
                .characteristic_mut(characteristic, service)?;
            c.descriptors_discovered = true;
            let descriptors = c
                .descriptors
                .iter()
                .map(|d| d.snapshot(characteristic, service))
                .collect();
            Some(TransportEvent::DescriptorsDiscovered {
                peripheral: id,
                characteristic,
                descriptors,
                error: None,
            })
        })
    }

    fn read_characteristic(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<(), TransportError> {
        let id = *id;
        let command = Command::ReadCharacteristic {
            peripheral: id,
            characteristic,
        };
        self.submit(command, move |state| {
            let c = state
                .peripheral_mut(&id)?
                .characteristic_mut(characteristic, service)?;
            Some(TransportEvent::CharacteristicValueUpdated {
                peripheral: id,
                characteristic: c.snapshot(service),
                error: None,
            })
        })
    }

    fn write_characteristic(
        &self,
        id: &PeripheralId,
        data: &[u8],
        write_type: WriteType,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<(), TransportError> {
        let id = *id;
        let value = data.to_vec();
        let command = Command::WriteCharacteristic {
            peripheral: id,
            characteristic,
            data: value.clone(),
            write_type,
        };
        self.submit(command, move |state| {
            let c = state
                .peripheral_mut(&id)?
                .characteristic_mut(characteristic, service)?;
            c.value = value;
            match write_type {
                WriteType::WithResponse => Some(TransportEvent::CharacteristicWritten {
                    peripheral: id,
                    characteristic: c.snapshot(service),
                    error: None,
                }),
                WriteType::WithoutResponse => None,
            }
        })
    }

    fn set_notify(
        &self,
        id: &PeripheralId,
        enabled: bool,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<(), TransportError> {
        let id = *id;
        let command = Command::SetNotify {
            peripheral: id,
            characteristic,
            enabled,
        };
        self.submit(command, move |state| {
            let c = state
                .peripheral_mut(&id)?
                .characteristic_mut(characteristic, service)?;
            c.notifying = enabled;
            Some(TransportEvent::NotifyStateUpdated {
                peripheral: id,
                characteristic: c.snapshot(service),
                error: None,
            })
        })
    }

    fn read_descriptor(
        &self,
        id: &PeripheralId,
        descriptor: Uuid,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<(), TransportError> {
        let id = *id;
        let command = Command::ReadDescriptor {
            peripheral: id,
            descriptor,
        };
        self.submit(command, move |state| {
            let d = state
                .peripheral_mut(&id)?
                .characteristic_mut(characteristic, service)?
                .descriptor(descriptor)?;
            Some(TransportEvent::DescriptorValueUpdated {
                peripheral: id,
                descriptor: d.snapshot(characteristic, service),
                error: None,
            })
        })
    }

    fn write_descriptor(
        &self,
        id: &PeripheralId,
        data: &[u8],
        descriptor: Uuid,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<(), TransportError> {
        let id = *id;
        let value = data.to_vec();
        let command = Command::WriteDescriptor {
            peripheral: id,
            descriptor,
            data: value.clone(),
        };
        self.submit(command, move |state| {
            let d = state
                .peripheral_mut(&id)?
                .characteristic_mut(characteristic, service)?
                .descriptors
                .iter_mut()
                .find(|d| d.uuid == descriptor)?;
            d.value = value;
            Some(TransportEvent::DescriptorWritten {
                peripheral: id,
                descriptor: d.snapshot(characteristic, service),
                error: None,
            })
        })
    }
}
