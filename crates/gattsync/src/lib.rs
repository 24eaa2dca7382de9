//! gattsync: timeout-bounded calls over an event-driven BLE central.
//!
//! A [`Transport`] accepts commands and reports their completions later as
//! [`TransportEvent`]s. [`Central`] turns each command/event pair into a
//! single awaitable call, keeping independent peripherals in parallel and
//! discarding late events. Unsolicited events go out on a [`Notifier`].

mod blocking;
mod central;
mod config;
mod error;
mod notification;
mod operation;
pub mod registry;
mod resource;
mod router;
pub mod sim;
mod transport;
mod watchdog;

pub use blocking::BlockingCentral;
pub use central::Central;
pub use config::CentralConfig;
pub use error::{BridgeError, Result, TransportError};
pub use notification::{Notification, NotificationBus, Notifier};
pub use operation::{Completion, OperationKind, PendingResult};
pub use resource::{
    AdapterState, Advertisement, AdvertisementData, Characteristic, ConnectionState, Descriptor,
    Peripheral, PeripheralId, ResourceKey, Service, uuid_from_u16,
};
pub use router::EventRouter;
pub use transport::{Transport, TransportEvent, WriteType};
pub use watchdog::{Watchdog, WatchdogManager};
