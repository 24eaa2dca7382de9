use serde::{Deserialize, Serialize};

use crate::operation::OperationKind;

/// Error reported by the transport, passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportError {
    #[error("transport error {code}: {message}")]
    Reported { code: i32, message: String },
    /// Completion reported failure but carried no error.
    #[error("transport reported a failure without an error")]
    NotDetermined,
    #[error("command rejected by transport: {reason}")]
    Rejected { reason: String },
}

impl TransportError {
    pub fn reported(code: i32, message: impl Into<String>) -> Self {
        Self::Reported {
            code,
            message: message.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("adapter is not powered on")]
    NotReady,
    #[error("{0} already in progress for this resource")]
    AlreadyInProgress(OperationKind),
    #[error("peripheral is still connecting")]
    StillConnecting,
    #[error("peripheral is still disconnecting")]
    StillDisconnecting,
    #[error("peripheral is not connected")]
    PeripheralNotConnected,
    #[error("already scanning")]
    AlreadyScanning,
    #[error("scanning is not active")]
    ScanningNotActive,
    #[error("no tokio runtime available")]
    NoRuntime,
    #[error("failed to start runtime: {0}")]
    Runtime(String),

    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),
    #[error("peripheral not found")]
    PeripheralNotFound,
    #[error("service not found")]
    ServiceNotFound,
    #[error("included service not found")]
    IncludedServiceNotFound,
    #[error("characteristic not found")]
    CharacteristicNotFound,
    #[error("descriptor not found")]
    DescriptorNotFound,

    #[error("timed out while trying to {0}")]
    TimedOut(OperationKind),

    /// The gate was released without a usable result. Always a bridge defect.
    #[error("{0} completed without a result")]
    ResultMissing(OperationKind),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
