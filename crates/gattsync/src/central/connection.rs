use std::time::Duration;

use super::{Central, expect_shape};
use crate::error::{BridgeError, Result};
use crate::operation::OperationKind;
use crate::resource::{ConnectionState, Peripheral, PeripheralId};

impl Central {
    /// Connect to a known peripheral. Already connected is success. A
    /// peripheral that is still disconnecting may be reconnected.
    pub async fn connect(&self, id: &PeripheralId, timeout: Option<Duration>) -> Result<Peripheral> {
        let peripheral = self.known_peripheral(id)?;
        match peripheral.state {
            ConnectionState::Connected => {
                tracing::debug!(peripheral = %id, "Already connected");
                return Ok(peripheral);
            }
            ConnectionState::Connecting => return Err(BridgeError::StillConnecting),
            ConnectionState::Disconnecting | ConnectionState::Disconnected => {}
        }

        tracing::info!(peripheral = %id, name = ?peripheral.name, "Connecting");
        let kind = OperationKind::Connect;
        let completion = self
            .exchange(&id.key(), kind, None, timeout, |t| t.connect(id))
            .await
            .inspect_err(|e| tracing::warn!(peripheral = %id, error = %e, "Connect failed"))?;

        let peripheral = expect_shape(kind, completion.into_peripheral())?;
        tracing::info!(peripheral = %id, "Connected");
        Ok(peripheral)
    }

    /// Disconnect from a peripheral. Already disconnected is success.
    /// Disconnecting a peripheral that is still connecting cancels the
    /// pending connection attempt.
    pub async fn disconnect(
        &self,
        id: &PeripheralId,
        timeout: Option<Duration>,
    ) -> Result<Peripheral> {
        let peripheral = self.known_peripheral(id)?;
        match peripheral.state {
            ConnectionState::Disconnected => {
                tracing::debug!(peripheral = %id, "Already disconnected");
                return Ok(peripheral);
            }
            ConnectionState::Disconnecting => return Err(BridgeError::StillDisconnecting),
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }

        tracing::info!(peripheral = %id, state = ?peripheral.state, "Disconnecting");
        let kind = OperationKind::Disconnect;
        let completion = self
            .exchange(&id.key(), kind, None, timeout, |t| t.disconnect(id))
            .await?;

        let peripheral = expect_shape(kind, completion.into_peripheral())?;
        tracing::info!(peripheral = %id, "Disconnected");
        Ok(peripheral)
    }

    pub async fn read_rssi(&self, id: &PeripheralId, timeout: Option<Duration>) -> Result<i16> {
        self.connected_peripheral(id)?;
        let kind = OperationKind::ReadRssi;
        let completion = self
            .exchange(&id.key(), kind, None, timeout, |t| t.read_rssi(id))
            .await?;
        expect_shape(kind, completion.into_rssi())
    }
}
