//! Notification bus for unsolicited events.
//!
//! Publication is fire-and-forget. Slow subscribers lag and lose messages;
//! they never hold up the event queues.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::TransportError;
use crate::resource::{AdapterState, Advertisement, Peripheral};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "kebab-case")]
pub enum Notification {
    AdapterStateChanged {
        state: AdapterState,
    },
    PeripheralDiscovered {
        advertisement: Advertisement,
    },
    /// A disconnect nobody asked for.
    UnexpectedDisconnection {
        peripheral: Peripheral,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportError>,
    },
    ScanTimedOut,
}

impl Notification {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::AdapterStateChanged { .. } => "adapter-state-changed",
            Self::PeripheralDiscovered { .. } => "peripheral-discovered",
            Self::UnexpectedDisconnection { .. } => "unexpected-disconnection",
            Self::ScanTimedOut => "scan-timed-out",
        }
    }
}

/// Output channel for unsolicited events. Must never block.
pub trait Notifier: Send + Sync {
    fn publish(&self, notification: Notification);
}

pub struct NotificationBus {
    tx: broadcast::Sender<Notification>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Notifier for NotificationBus {
    fn publish(&self, notification: Notification) {
        let topic = notification.topic();
        match self.tx.send(notification) {
            Ok(receivers) => tracing::trace!(topic, receivers, "Published notification"),
            // No subscribers.
            Err(_) => tracing::trace!(topic, "Notification dropped"),
        }
    }
}
