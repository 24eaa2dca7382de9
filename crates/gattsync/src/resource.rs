//! Resource handles and identities.
//!
//! Handles are immutable snapshots reported by the transport. The bridge never
//! mutates them; it only threads them from completion events back to callers.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BridgeError;

/// Unique identifier for a remote peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralId(Uuid);

impl PeripheralId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, BridgeError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| BridgeError::MalformedIdentifier(s.to_string()))
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::peripheral(self)
    }
}

impl FromStr for PeripheralId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for PeripheralId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Expand a 16-bit assigned number into a full UUID on the Bluetooth base.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// Registry key of a resource: a peripheral, or the adapter-wide scan key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    const SCAN: &'static str = "gattsync.scan";

    pub fn peripheral(id: &PeripheralId) -> Self {
        Self(id.to_string())
    }

    pub fn scan() -> Self {
        Self(Self::SCAN.to_string())
    }

    pub fn is_scan(&self) -> bool {
        self.0 == Self::SCAN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Power/availability state of the local adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    #[default]
    Unknown,
    /// Connection with the system service was momentarily lost.
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    /// The only state in which commands are accepted.
    PoweredOn,
}

impl AdapterState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peripheral {
    pub id: PeripheralId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub state: ConnectionState,
}

impl Peripheral {
    pub fn new(id: PeripheralId) -> Self {
        Self {
            id,
            name: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }

    pub fn key(&self) -> ResourceKey {
        self.id.key()
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub uuid: Uuid,
    pub is_primary: bool,
}

impl Service {
    pub fn primary(uuid: Uuid) -> Self {
        Self {
            uuid,
            is_primary: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    pub is_notifying: bool,
}

impl Characteristic {
    pub fn new(uuid: Uuid, service_uuid: Uuid) -> Self {
        Self {
            uuid,
            service_uuid,
            value: None,
            is_notifying: false,
        }
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub service_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
}

impl Descriptor {
    pub fn new(uuid: Uuid, characteristic_uuid: Uuid, service_uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristic_uuid,
            service_uuid,
            value: None,
        }
    }
}

/// Advertisement payload as reported during a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub service_data: HashMap<Uuid, Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_uuids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_power_level: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_connectable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub peripheral: Peripheral,
    pub data: AdvertisementData,
    pub rssi: i16,
    pub seen_at: DateTime<Utc>,
}

impl Advertisement {
    pub fn new(peripheral: Peripheral, data: AdvertisementData, rssi: i16) -> Self {
        Self {
            peripheral,
            data,
            rssi,
            seen_at: Utc::now(),
        }
    }
}
