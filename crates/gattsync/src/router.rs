//! Event router: correlates transport events with waiting calls.
//!
//! Every event is handed to its peripheral's serialized queue. The handler
//! either completes the matching lane, republishes an unrequested disconnect,
//! or discards the event as stale.

use std::sync::{Arc, Weak};

use crate::error::TransportError;
use crate::notification::{Notification, Notifier};
use crate::operation::{Completion, OperationKind, PendingResult};
use crate::registry::{Registry, Slot};
use crate::transport::TransportEvent;

/// Handle given to the transport for event delivery. Cheap to clone.
///
/// Holds the registry weakly: once the owning central is gone, events are
/// dropped on the floor.
#[derive(Clone)]
pub struct EventRouter {
    registry: Weak<Registry>,
    notifier: Arc<dyn Notifier>,
}

impl EventRouter {
    pub(crate) fn new(registry: &Arc<Registry>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            notifier,
        }
    }

    /// Accept an event from any thread. Never blocks.
    pub fn deliver(&self, event: TransportEvent) {
        if event.is_broadcast_only() {
            publish_broadcast(self.notifier.as_ref(), event);
            return;
        }

        let Some(registry) = self.registry.upgrade() else {
            tracing::trace!(event = event.name(), "Central gone - discarding event");
            return;
        };
        let Some(id) = event.peripheral_id() else {
            return;
        };

        let slot = registry.get_or_create(&id.key());
        let notifier = Arc::clone(&self.notifier);
        let worker_slot = Arc::clone(&slot);
        slot.enqueue(move || handle(&worker_slot, notifier.as_ref(), event));
    }
}

fn publish_broadcast(notifier: &dyn Notifier, event: TransportEvent) {
    match event {
        TransportEvent::AdapterStateChanged { state } => {
            tracing::info!(?state, "Adapter state changed");
            notifier.publish(Notification::AdapterStateChanged { state });
        }
        TransportEvent::PeripheralDiscovered { advertisement } => {
            tracing::trace!(peripheral = %advertisement.peripheral.id, rssi = advertisement.rssi, "Peripheral discovered");
            notifier.publish(Notification::PeripheralDiscovered { advertisement });
        }
        other => tracing::error!(event = other.name(), "Not a broadcast event"),
    }
}

fn outcome(error: Option<TransportError>, payload: impl FnOnce() -> Completion) -> PendingResult {
    match error {
        Some(e) => Err(e),
        None => Ok(payload()),
    }
}

fn complete(
    slot: &Slot,
    event: &'static str,
    kind: OperationKind,
    target: Option<uuid::Uuid>,
    result: PendingResult,
) {
    if !slot.complete(kind, target, result) {
        tracing::trace!(key = %slot.key(), event, %kind, "Discarding stale event");
    }
}

/// Runs on the slot's queue worker.
fn handle(slot: &Slot, notifier: &dyn Notifier, event: TransportEvent) {
    let name = event.name();
    match event {
        TransportEvent::Connected { peripheral } => {
            complete(
                slot,
                name,
                OperationKind::Connect,
                None,
                Ok(Completion::Peripheral(peripheral)),
            );
        }
        TransportEvent::ConnectFailed { error, .. } => {
            let error = error.unwrap_or(TransportError::NotDetermined);
            complete(slot, name, OperationKind::Connect, None, Err(error));
        }
        TransportEvent::Disconnected { peripheral, error } => {
            let result = match &error {
                Some(e) => Err(e.clone()),
                None => Ok(Completion::Peripheral(peripheral.clone())),
            };
            if !slot.complete(OperationKind::Disconnect, None, result) {
                tracing::warn!(
                    key = %slot.key(),
                    error = error.as_ref().map(tracing::field::display),
                    "Unexpected disconnection"
                );
                notifier.publish(Notification::UnexpectedDisconnection { peripheral, error });
            }
        }
        TransportEvent::RssiRead { rssi, error, .. } => {
            let result = outcome(error, || Completion::Rssi(rssi));
            complete(slot, name, OperationKind::ReadRssi, None, result);
        }
        TransportEvent::ServicesDiscovered {
            services, error, ..
        } => {
            let result = outcome(error, || Completion::Services(services));
            complete(slot, name, OperationKind::DiscoverServices, None, result);
        }
        TransportEvent::IncludedServicesDiscovered {
            service,
            services,
            error,
            ..
        } => {
            let result = outcome(error, || Completion::Services(services));
            complete(
                slot,
                name,
                OperationKind::DiscoverIncludedServices,
                Some(service),
                result,
            );
        }
        TransportEvent::CharacteristicsDiscovered {
            service,
            characteristics,
            error,
            ..
        } => {
            let result = outcome(error, || Completion::Characteristics(characteristics));
            complete(
                slot,
                name,
                OperationKind::DiscoverCharacteristics,
                Some(service),
                result,
            );
        }
        TransportEvent::CharacteristicValueUpdated {
            characteristic,
            error,
            ..
        } => {
            // A read response and a notification look the same; serve both lanes.
            let target = Some(characteristic.uuid);
            let result = outcome(error, || Completion::Characteristic(characteristic));
            complete(
                slot,
                name,
                OperationKind::ReadCharacteristic,
                target,
                result.clone(),
            );
            complete(slot, name, OperationKind::WaitForNotification, target, result);
        }
        TransportEvent::CharacteristicWritten {
            characteristic,
            error,
            ..
        } => {
            let target = Some(characteristic.uuid);
            let result = outcome(error, || Completion::Characteristic(characteristic));
            complete(slot, name, OperationKind::WriteCharacteristic, target, result);
        }
        TransportEvent::NotifyStateUpdated {
            characteristic,
            error,
            ..
        } => {
            let target = Some(characteristic.uuid);
            let result = outcome(error, || Completion::Characteristic(characteristic));
            complete(slot, name, OperationKind::SetNotify, target, result);
        }
        TransportEvent::DescriptorsDiscovered {
            characteristic,
            descriptors,
            error,
            ..
        } => {
            let result = outcome(error, || Completion::Descriptors(descriptors));
            complete(
                slot,
                name,
                OperationKind::DiscoverDescriptors,
                Some(characteristic),
                result,
            );
        }
        TransportEvent::DescriptorValueUpdated {
            descriptor, error, ..
        } => {
            let target = Some(descriptor.uuid);
            let result = outcome(error, || Completion::Descriptor(descriptor));
            complete(slot, name, OperationKind::ReadDescriptor, target, result);
        }
        TransportEvent::DescriptorWritten {
            descriptor, error, ..
        } => {
            let target = Some(descriptor.uuid);
            let result = outcome(error, || Completion::Descriptor(descriptor));
            complete(slot, name, OperationKind::WriteDescriptor, target, result);
        }
        other @ (TransportEvent::AdapterStateChanged { .. }
        | TransportEvent::PeripheralDiscovered { .. }) => publish_broadcast(notifier, other),
    }
}
