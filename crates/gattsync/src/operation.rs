//! Operation kinds and completion payloads.

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::resource::{Characteristic, Descriptor, Peripheral, Service};

/// Kind of a waiting operation. Each kind has its own lane in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Connect,
    Disconnect,
    ReadRssi,
    DiscoverServices,
    DiscoverIncludedServices,
    DiscoverCharacteristics,
    ReadCharacteristic,
    WriteCharacteristic,
    SetNotify,
    WaitForNotification,
    DiscoverDescriptors,
    ReadDescriptor,
    WriteDescriptor,
    StopScan,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::ReadRssi => "read rssi",
            Self::DiscoverServices => "discover services",
            Self::DiscoverIncludedServices => "discover included services",
            Self::DiscoverCharacteristics => "discover characteristics",
            Self::ReadCharacteristic => "read characteristic",
            Self::WriteCharacteristic => "write characteristic",
            Self::SetNotify => "update notify status",
            Self::WaitForNotification => "wait for notification",
            Self::DiscoverDescriptors => "discover descriptors",
            Self::ReadDescriptor => "read descriptor",
            Self::WriteDescriptor => "write descriptor",
            Self::StopScan => "stop scan",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful completion payload written into a slot lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Peripheral(Peripheral),
    Rssi(i16),
    Services(Vec<Service>),
    Characteristics(Vec<Characteristic>),
    Characteristic(Characteristic),
    Descriptors(Vec<Descriptor>),
    Descriptor(Descriptor),
    /// Released by an explicit stop rather than a transport event.
    ScanStopped,
}

impl Completion {
    pub fn into_peripheral(self) -> Option<Peripheral> {
        match self {
            Self::Peripheral(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_rssi(self) -> Option<i16> {
        match self {
            Self::Rssi(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_services(self) -> Option<Vec<Service>> {
        match self {
            Self::Services(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_characteristics(self) -> Option<Vec<Characteristic>> {
        match self {
            Self::Characteristics(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_characteristic(self) -> Option<Characteristic> {
        match self {
            Self::Characteristic(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_descriptors(self) -> Option<Vec<Descriptor>> {
        match self {
            Self::Descriptors(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_descriptor(self) -> Option<Descriptor> {
        match self {
            Self::Descriptor(d) => Some(d),
            _ => None,
        }
    }
}

/// Result cell contents for one request/response cycle.
pub type PendingResult = Result<Completion, TransportError>;
