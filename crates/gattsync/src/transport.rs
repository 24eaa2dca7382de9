//! Transport seam: the event-driven protocol stack the bridge drives.
//!
//! Commands are fire-and-forget. Each accepted command is completed later by
//! exactly one [`TransportEvent`] handed to [`EventRouter::deliver`], from any
//! thread. A synchronous `Err` means the command was never submitted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportError;
use crate::resource::{
    AdapterState, Advertisement, Characteristic, Descriptor, Peripheral, PeripheralId, Service,
};
use crate::router::EventRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

impl WriteType {
    pub fn from_response_flag(with_response: bool) -> Self {
        if with_response {
            Self::WithResponse
        } else {
            Self::WithoutResponse
        }
    }
}

pub trait Transport: Send + Sync {
    /// Called once by the central so the transport knows where to deliver.
    fn bind(&self, router: EventRouter);

    fn adapter_state(&self) -> AdapterState;
    fn is_scanning(&self) -> bool;

    // Cache lookups. These reflect what has been discovered so far.
    fn peripheral(&self, id: &PeripheralId) -> Option<Peripheral>;
    fn service(&self, id: &PeripheralId, service: Uuid) -> Option<Service>;
    fn characteristic(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        service: Uuid,
    ) -> Option<Characteristic>;
    fn descriptor(
        &self,
        id: &PeripheralId,
        descriptor: Uuid,
        characteristic: Uuid,
        service: Uuid,
    ) -> Option<Descriptor>;

    fn start_scan(&self, services: Option<&[Uuid]>) -> Result<(), TransportError>;
    fn stop_scan(&self) -> Result<(), TransportError>;

    fn connect(&self, id: &PeripheralId) -> Result<(), TransportError>;
    fn disconnect(&self, id: &PeripheralId) -> Result<(), TransportError>;
    fn read_rssi(&self, id: &PeripheralId) -> Result<(), TransportError>;

    fn discover_services(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
    ) -> Result<(), TransportError>;
    fn discover_included_services(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        service: Uuid,
    ) -> Result<(), TransportError>;
    fn discover_characteristics(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        service: Uuid,
    ) -> Result<(), TransportError>;
    fn discover_descriptors(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<(), TransportError>;

    fn read_characteristic(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<(), TransportError>;
    /// `WithoutResponse` writes produce no completion event.
    fn write_characteristic(
        &self,
        id: &PeripheralId,
        data: &[u8],
        write_type: WriteType,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<(), TransportError>;
    fn set_notify(
        &self,
        id: &PeripheralId,
        enabled: bool,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<(), TransportError>;

    fn read_descriptor(
        &self,
        id: &PeripheralId,
        descriptor: Uuid,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<(), TransportError>;
    fn write_descriptor(
        &self,
        id: &PeripheralId,
        data: &[u8],
        descriptor: Uuid,
        characteristic: Uuid,
        service: Uuid,
    ) -> Result<(), TransportError>;
}

/// Raw event reported by the transport.
///
/// `error: None` means success, except on `ConnectFailed`, where a missing
/// error is reported as [`TransportError::NotDetermined`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    AdapterStateChanged {
        state: AdapterState,
    },
    PeripheralDiscovered {
        advertisement: Advertisement,
    },
    Connected {
        peripheral: Peripheral,
    },
    ConnectFailed {
        peripheral: Peripheral,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
    Disconnected {
        peripheral: Peripheral,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
    RssiRead {
        peripheral: PeripheralId,
        rssi: i16,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
    ServicesDiscovered {
        peripheral: PeripheralId,
        services: Vec<Service>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
    IncludedServicesDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        services: Vec<Service>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: Vec<Characteristic>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
    /// A read completed or a notification arrived.
    CharacteristicValueUpdated {
        peripheral: PeripheralId,
        characteristic: Characteristic,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
    CharacteristicWritten {
        peripheral: PeripheralId,
        characteristic: Characteristic,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
    NotifyStateUpdated {
        peripheral: PeripheralId,
        characteristic: Characteristic,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
    DescriptorsDiscovered {
        peripheral: PeripheralId,
        characteristic: Uuid,
        descriptors: Vec<Descriptor>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
    DescriptorValueUpdated {
        peripheral: PeripheralId,
        descriptor: Descriptor,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
    DescriptorWritten {
        peripheral: PeripheralId,
        descriptor: Descriptor,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
}

impl TransportEvent {
    /// The peripheral the event concerns. `None` for adapter-wide events.
    pub fn peripheral_id(&self) -> Option<PeripheralId> {
        match self {
            Self::AdapterStateChanged { .. } => None,
            Self::PeripheralDiscovered { advertisement } => Some(advertisement.peripheral.id),
            Self::Connected { peripheral }
            | Self::ConnectFailed { peripheral, .. }
            | Self::Disconnected { peripheral, .. } => Some(peripheral.id),
            Self::RssiRead { peripheral, .. }
            | Self::ServicesDiscovered { peripheral, .. }
            | Self::IncludedServicesDiscovered { peripheral, .. }
            | Self::CharacteristicsDiscovered { peripheral, .. }
            | Self::CharacteristicValueUpdated { peripheral, .. }
            | Self::CharacteristicWritten { peripheral, .. }
            | Self::NotifyStateUpdated { peripheral, .. }
            | Self::DescriptorsDiscovered { peripheral, .. }
            | Self::DescriptorValueUpdated { peripheral, .. }
            | Self::DescriptorWritten { peripheral, .. } => Some(*peripheral),
        }
    }

    /// Events that never complete a call and go straight to the bus.
    pub fn is_broadcast_only(&self) -> bool {
        matches!(
            self,
            Self::AdapterStateChanged { .. } | Self::PeripheralDiscovered { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AdapterStateChanged { .. } => "adapter_state_changed",
            Self::PeripheralDiscovered { .. } => "peripheral_discovered",
            Self::Connected { .. } => "connected",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::Disconnected { .. } => "disconnected",
            Self::RssiRead { .. } => "rssi_read",
            Self::ServicesDiscovered { .. } => "services_discovered",
            Self::IncludedServicesDiscovered { .. } => "included_services_discovered",
            Self::CharacteristicsDiscovered { .. } => "characteristics_discovered",
            Self::CharacteristicValueUpdated { .. } => "characteristic_value_updated",
            Self::CharacteristicWritten { .. } => "characteristic_written",
            Self::NotifyStateUpdated { .. } => "notify_state_updated",
            Self::DescriptorsDiscovered { .. } => "descriptors_discovered",
            Self::DescriptorValueUpdated { .. } => "descriptor_value_updated",
            Self::DescriptorWritten { .. } => "descriptor_written",
        }
    }
}
