use std::time::Duration;

use uuid::Uuid;

use super::{Central, expect_shape};
use crate::error::{BridgeError, Result};
use crate::operation::OperationKind;
use crate::resource::{Characteristic, Descriptor, PeripheralId, Service};
use crate::transport::WriteType;

impl Central {
    /// Discover services, optionally restricted to `uuids`. The filter is
    /// passed to the transport; the returned list is not filtered again.
    pub async fn discover_services(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Service>> {
        self.connected_peripheral(id)?;
        let kind = OperationKind::DiscoverServices;
        let completion = self
            .exchange(&id.key(), kind, None, timeout, |t| {
                t.discover_services(id, uuids)
            })
            .await?;
        let services = expect_shape(kind, completion.into_services())?;
        tracing::debug!(peripheral = %id, count = services.len(), "Discovered services");
        Ok(services)
    }

    pub async fn discover_service(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Service> {
        self.discover_services(id, Some(std::slice::from_ref(&uuid)), timeout)
            .await?
            .into_iter()
            .find(|s| s.uuid == uuid)
            .ok_or(BridgeError::ServiceNotFound)
    }

    pub async fn discover_included_services(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Vec<Service>> {
        self.service_of(id, service)?;
        let kind = OperationKind::DiscoverIncludedServices;
        let completion = self
            .exchange(&id.key(), kind, Some(service), timeout, |t| {
                t.discover_included_services(id, uuids, service)
            })
            .await?;
        expect_shape(kind, completion.into_services())
    }

    pub async fn discover_included_service(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Service> {
        self.discover_included_services(id, Some(std::slice::from_ref(&uuid)), service, timeout)
            .await?
            .into_iter()
            .find(|s| s.uuid == uuid)
            .ok_or(BridgeError::IncludedServiceNotFound)
    }

    pub async fn discover_characteristics(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Vec<Characteristic>> {
        self.service_of(id, service)?;
        let kind = OperationKind::DiscoverCharacteristics;
        let completion = self
            .exchange(&id.key(), kind, Some(service), timeout, |t| {
                t.discover_characteristics(id, uuids, service)
            })
            .await?;
        let characteristics = expect_shape(kind, completion.into_characteristics())?;
        tracing::debug!(peripheral = %id, %service, count = characteristics.len(), "Discovered characteristics");
        Ok(characteristics)
    }

    pub async fn discover_characteristic(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Characteristic> {
        self.discover_characteristics(id, Some(std::slice::from_ref(&uuid)), service, timeout)
            .await?
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(BridgeError::CharacteristicNotFound)
    }

    pub async fn read_characteristic(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Characteristic> {
        self.characteristic_of(id, uuid, service)?;
        let kind = OperationKind::ReadCharacteristic;
        let completion = self
            .exchange(&id.key(), kind, Some(uuid), timeout, |t| {
                t.read_characteristic(id, uuid, service)
            })
            .await?;
        expect_shape(kind, completion.into_characteristic())
    }

    /// Write a value. Without a response the call returns as soon as the
    /// transport accepts the command, with the cached characteristic.
    pub async fn write_characteristic(
        &self,
        id: &PeripheralId,
        data: &[u8],
        with_response: bool,
        uuid: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Characteristic> {
        let cached = self.characteristic_of(id, uuid, service)?;
        let write_type = WriteType::from_response_flag(with_response);

        if write_type == WriteType::WithoutResponse {
            self.transport
                .write_characteristic(id, data, write_type, uuid, service)?;
            tracing::trace!(peripheral = %id, characteristic = %uuid, len = data.len(), "Wrote without response");
            return Ok(cached);
        }

        let kind = OperationKind::WriteCharacteristic;
        let completion = self
            .exchange(&id.key(), kind, Some(uuid), timeout, |t| {
                t.write_characteristic(id, data, write_type, uuid, service)
            })
            .await?;
        expect_shape(kind, completion.into_characteristic())
    }

    pub async fn set_notify(
        &self,
        id: &PeripheralId,
        enabled: bool,
        characteristic: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Characteristic> {
        self.characteristic_of(id, characteristic, service)?;
        let kind = OperationKind::SetNotify;
        let completion = self
            .exchange(&id.key(), kind, Some(characteristic), timeout, |t| {
                t.set_notify(id, enabled, characteristic, service)
            })
            .await?;
        let updated = expect_shape(kind, completion.into_characteristic())?;
        tracing::debug!(peripheral = %id, %characteristic, notifying = updated.is_notifying, "Notify state updated");
        Ok(updated)
    }

    /// Wait for the next value update of a characteristic. Issues no command.
    pub async fn wait_for_notification(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Characteristic> {
        self.characteristic_of(id, characteristic, service)?;
        let kind = OperationKind::WaitForNotification;
        let completion = self
            .exchange(&id.key(), kind, Some(characteristic), timeout, |_| Ok(()))
            .await?;
        expect_shape(kind, completion.into_characteristic())
    }

    pub async fn discover_descriptors(
        &self,
        id: &PeripheralId,
        uuids: Option<&[Uuid]>,
        characteristic: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Vec<Descriptor>> {
        self.characteristic_of(id, characteristic, service)?;
        let kind = OperationKind::DiscoverDescriptors;
        let completion = self
            .exchange(&id.key(), kind, Some(characteristic), timeout, |t| {
                t.discover_descriptors(id, uuids, characteristic, service)
            })
            .await?;
        expect_shape(kind, completion.into_descriptors())
    }

    pub async fn discover_descriptor(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        characteristic: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Descriptor> {
        self.discover_descriptors(id, Some(std::slice::from_ref(&uuid)), characteristic, service, timeout)
            .await?
            .into_iter()
            .find(|d| d.uuid == uuid)
            .ok_or(BridgeError::DescriptorNotFound)
    }

    pub async fn read_descriptor(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        characteristic: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Descriptor> {
        self.descriptor_of(id, uuid, characteristic, service)?;
        let kind = OperationKind::ReadDescriptor;
        let completion = self
            .exchange(&id.key(), kind, Some(uuid), timeout, |t| {
                t.read_descriptor(id, uuid, characteristic, service)
            })
            .await?;
        expect_shape(kind, completion.into_descriptor())
    }

    pub async fn write_descriptor(
        &self,
        id: &PeripheralId,
        data: &[u8],
        uuid: Uuid,
        characteristic: Uuid,
        service: Uuid,
        timeout: Option<Duration>,
    ) -> Result<Descriptor> {
        self.descriptor_of(id, uuid, characteristic, service)?;
        let kind = OperationKind::WriteDescriptor;
        let completion = self
            .exchange(&id.key(), kind, Some(uuid), timeout, |t| {
                t.write_descriptor(id, data, uuid, characteristic, service)
            })
            .await?;
        expect_shape(kind, completion.into_descriptor())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use uuid::Uuid;

    use super::super::tests::{
        BATTERY_LEVEL, BATTERY_SERVICE, CCCD, DEVICE_INFO, battery_peripheral, central_with,
    };
    use crate::central::Central;
    use crate::error::BridgeError;
    use crate::operation::OperationKind;
    use crate::resource::{Characteristic, PeripheralId, uuid_from_u16};
    use crate::sim::{Command, SimCharacteristic, SimPeripheral, SimService, SimulatedTransport};
    use crate::transport::{TransportEvent, WriteType};

    const POWER_STATE: Uuid = uuid_from_u16(0x2A1A);

    /// Connected, services discovered, battery service carrying two characteristics.
    async fn two_characteristics(sim: &SimulatedTransport) -> (Arc<Central>, PeripheralId) {
        let id = sim.add_peripheral(
            SimPeripheral::new("sensor").with_service(
                SimService::new(BATTERY_SERVICE)
                    .with_characteristic(SimCharacteristic::new(BATTERY_LEVEL).with_value([50]))
                    .with_characteristic(SimCharacteristic::new(POWER_STATE)),
            ),
        );
        let (central, _bus) = central_with(sim);
        central.connect(&id, None).await.unwrap();
        central.discover_services(&id, None, None).await.unwrap();
        (Arc::new(central), id)
    }

    async fn connected(sim: &SimulatedTransport) -> (Central, PeripheralId) {
        let id = sim.add_peripheral(
            battery_peripheral("sensor").with_service(
                SimService::new(uuid_from_u16(0x1800)).with_included(BATTERY_SERVICE),
            ),
        );
        let (central, _bus) = central_with(sim);
        central.connect(&id, None).await.unwrap();
        (central, id)
    }

    /// Connected with the battery level characteristic and its descriptors discovered.
    async fn ready_to_read(sim: &SimulatedTransport) -> (Central, PeripheralId) {
        let (central, id) = connected(sim).await;
        central.discover_services(&id, None, None).await.unwrap();
        central
            .discover_characteristics(&id, None, BATTERY_SERVICE, None)
            .await
            .unwrap();
        central
            .discover_descriptors(&id, None, BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await
            .unwrap();
        (central, id)
    }

    #[tokio::test]
    async fn filter_is_passed_through_and_result_is_not_refiltered() {
        let sim = SimulatedTransport::new();
        let (central, id) = connected(&sim).await;

        let services = central
            .discover_services(&id, Some(&[BATTERY_SERVICE][..]), None)
            .await
            .unwrap();

        assert_eq!(services.len(), 3);
        assert!(sim.commands().contains(&Command::DiscoverServices {
            peripheral: id,
            filter: Some(vec![BATTERY_SERVICE]),
        }));
    }

    #[tokio::test]
    async fn single_service_discovery_finds_match_or_not_found() {
        let sim = SimulatedTransport::new();
        let (central, id) = connected(&sim).await;

        let service = central.discover_service(&id, DEVICE_INFO, None).await.unwrap();
        assert_eq!(service.uuid, DEVICE_INFO);

        let err = central
            .discover_service(&id, Uuid::from_u128(0xdead), None)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::ServiceNotFound);
    }

    #[tokio::test]
    async fn characteristic_filter_is_passed_through_and_result_is_not_refiltered() {
        let sim = SimulatedTransport::new();
        let (central, id) = two_characteristics(&sim).await;

        let all = central
            .discover_characteristics(&id, Some(&[BATTERY_LEVEL][..]), BATTERY_SERVICE, None)
            .await
            .unwrap();
        let uuids: Vec<Uuid> = all.iter().map(|c| c.uuid).collect();
        assert_eq!(uuids, vec![BATTERY_LEVEL, POWER_STATE]);
        assert!(sim.commands().contains(&Command::DiscoverCharacteristics {
            peripheral: id,
            service: BATTERY_SERVICE,
            filter: Some(vec![BATTERY_LEVEL]),
        }));

        let one = central
            .discover_characteristic(&id, BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await
            .unwrap();
        assert_eq!(one.uuid, BATTERY_LEVEL);
    }

    #[tokio::test]
    async fn single_characteristic_discovery_without_match_is_not_found() {
        let sim = SimulatedTransport::new();
        let (central, id) = two_characteristics(&sim).await;
        sim.set_silent(true);

        let waiter = {
            let central = Arc::clone(&central);
            tokio::spawn(async move {
                central
                    .discover_characteristic(&id, BATTERY_LEVEL, BATTERY_SERVICE, None)
                    .await
            })
        };
        while !central.is_in_flight(&id.key(), OperationKind::DiscoverCharacteristics) {
            tokio::task::yield_now().await;
        }

        // The stack answers with a list that lacks the requested characteristic.
        sim.inject(TransportEvent::CharacteristicsDiscovered {
            peripheral: id,
            service: BATTERY_SERVICE,
            characteristics: vec![Characteristic::new(POWER_STATE, BATTERY_SERVICE)],
            error: None,
        });

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(BridgeError::CharacteristicNotFound));
    }

    #[tokio::test]
    async fn attributes_must_be_discovered_first() {
        let sim = SimulatedTransport::new();
        let (central, id) = connected(&sim).await;

        let err = central
            .read_characteristic(&id, BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::ServiceNotFound);

        central.discover_services(&id, None, None).await.unwrap();
        let err = central
            .read_characteristic(&id, BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::CharacteristicNotFound);
    }

    #[tokio::test]
    async fn included_services() {
        let sim = SimulatedTransport::new();
        let (central, id) = connected(&sim).await;
        central.discover_services(&id, None, None).await.unwrap();

        let gap = uuid_from_u16(0x1800);
        let included = central
            .discover_included_service(&id, BATTERY_SERVICE, gap, None)
            .await
            .unwrap();
        assert!(!included.is_primary);

        let err = central
            .discover_included_service(&id, DEVICE_INFO, gap, None)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::IncludedServiceNotFound);
    }

    #[tokio::test]
    async fn read_characteristic_value() {
        let sim = SimulatedTransport::new();
        let (central, id) = ready_to_read(&sim).await;

        let level = central
            .read_characteristic(&id, BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await
            .unwrap();
        assert_eq!(level.value, Some(vec![87]));
        assert_eq!(level.service_uuid, BATTERY_SERVICE);
    }

    #[tokio::test]
    async fn write_with_response_waits_for_confirmation() {
        let sim = SimulatedTransport::new();
        let (central, id) = ready_to_read(&sim).await;

        let written = central
            .write_characteristic(&id, &[1, 2], true, BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await
            .unwrap();
        assert_eq!(written.value, Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn write_without_response_never_waits() {
        let sim = SimulatedTransport::new();
        let (central, id) = ready_to_read(&sim).await;
        sim.set_silent(true);

        let started = std::time::Instant::now();
        central
            .write_characteristic(&id, &[9], false, BATTERY_LEVEL, BATTERY_SERVICE, Some(Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!central.is_in_flight(&id.key(), OperationKind::WriteCharacteristic));
        assert!(sim.commands().contains(&Command::WriteCharacteristic {
            peripheral: id,
            characteristic: BATTERY_LEVEL,
            data: vec![9],
            write_type: WriteType::WithoutResponse,
        }));
    }

    #[tokio::test]
    async fn notification_flow() {
        let sim = SimulatedTransport::new();
        let (central, id) = ready_to_read(&sim).await;
        let central = Arc::new(central);

        let updated = central
            .set_notify(&id, true, BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await
            .unwrap();
        assert!(updated.is_notifying);

        let waiter = {
            let central = Arc::clone(&central);
            tokio::spawn(async move {
                central
                    .wait_for_notification(&id, BATTERY_LEVEL, BATTERY_SERVICE, None)
                    .await
            })
        };
        while !central.is_in_flight(&id.key(), OperationKind::WaitForNotification) {
            tokio::task::yield_now().await;
        }

        sim.notify_value(&id, BATTERY_LEVEL, BATTERY_SERVICE, [42]).unwrap();
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.value, Some(vec![42]));
    }

    #[tokio::test]
    async fn wait_for_notification_times_out_without_updates() {
        let sim = SimulatedTransport::new();
        let (central, id) = ready_to_read(&sim).await;

        let err = central
            .wait_for_notification(&id, BATTERY_LEVEL, BATTERY_SERVICE, Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::TimedOut(OperationKind::WaitForNotification));
    }

    #[tokio::test]
    async fn descriptors() {
        let sim = SimulatedTransport::new();
        let (central, id) = ready_to_read(&sim).await;

        let cccd = central
            .discover_descriptor(&id, CCCD, BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await
            .unwrap();
        assert_eq!(cccd.characteristic_uuid, BATTERY_LEVEL);

        central
            .write_descriptor(&id, &[1, 0], CCCD, BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await
            .unwrap();
        let read = central
            .read_descriptor(&id, CCCD, BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await
            .unwrap();
        assert_eq!(read.value, Some(vec![1, 0]));

        let err = central
            .read_descriptor(&id, Uuid::from_u128(7), BATTERY_LEVEL, BATTERY_SERVICE, None)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::DescriptorNotFound);
    }

    #[tokio::test]
    async fn gatt_operations_require_connection() {
        let sim = SimulatedTransport::new();
        let id = sim.add_peripheral(battery_peripheral("sensor"));
        let (central, _bus) = central_with(&sim);

        let err = central.discover_services(&id, None, None).await.unwrap_err();
        assert_eq!(err, BridgeError::PeripheralNotConnected);
    }
}
