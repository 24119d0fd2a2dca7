//! GATT characteristic handling.
//!
//! Provides functionality for discovering, reading, writing, and
//! subscribing to characteristics on a connected micro:bit.

use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::transport::{CharacteristicHandle, NotificationEvent, NotificationStream, ServiceHandle};
use crate::error::{Error, Result};

/// Handler for GATT characteristics on one connected peripheral.
pub struct CharacteristicHandler {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Cached characteristics by UUID.
    characteristics: Arc<RwLock<HashMap<Uuid, Characteristic>>>,
}

impl CharacteristicHandler {
    /// Create a new characteristic handler for a peripheral.
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            characteristics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Discover services and keep those whose UUID is in `uuids`.
    pub async fn discover_services(&self, uuids: &[Uuid]) -> Result<Vec<ServiceHandle>> {
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;

        let services: Vec<ServiceHandle> = self
            .peripheral
            .services()
            .into_iter()
            .filter(|service| uuids.contains(&service.uuid))
            .map(|service| ServiceHandle { uuid: service.uuid })
            .collect();

        debug!("Discovered {} matching services", services.len());

        Ok(services)
    }

    /// Discover characteristics of one service and cache those whose UUID is in `uuids`.
    ///
    /// Services must have been discovered first.
    pub async fn discover_characteristics(
        &self,
        service: &ServiceHandle,
        uuids: &[Uuid],
    ) -> Result<Vec<CharacteristicHandle>> {
        let mut found = Vec::new();
        let mut chars = self.characteristics.write();

        for svc in self.peripheral.services() {
            if svc.uuid != service.uuid {
                continue;
            }
            for characteristic in svc.characteristics {
                if !uuids.contains(&characteristic.uuid) {
                    continue;
                }
                debug!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid, svc.uuid
                );
                found.push(CharacteristicHandle {
                    uuid: characteristic.uuid,
                    service_uuid: svc.uuid,
                });
                chars.insert(characteristic.uuid, characteristic);
            }
        }

        Ok(found)
    }

    /// Get a cached characteristic.
    fn characteristic(&self, handle: &CharacteristicHandle) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(&handle.uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: handle.uuid.to_string(),
            })
    }

    /// Read a characteristic value.
    pub async fn read(&self, handle: &CharacteristicHandle) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(handle)?;

        let data = self
            .peripheral
            .read(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Read {} bytes from characteristic {}", data.len(), handle.uuid);

        Ok(data)
    }

    /// Write to a characteristic with response.
    pub async fn write(&self, handle: &CharacteristicHandle, data: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(handle)?;

        self.peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Wrote {} bytes to characteristic {}", data.len(), handle.uuid);

        Ok(())
    }

    /// Subscribe to notifications from a characteristic.
    ///
    /// The returned stream carries every notification of the peripheral;
    /// callers filter by [`NotificationEvent::characteristic_uuid`].
    pub async fn subscribe(&self, handle: &CharacteristicHandle) -> Result<NotificationStream> {
        let characteristic = self.characteristic(handle)?;

        debug!(
            "Subscribing to {}, properties: {:?}",
            handle.uuid, characteristic.properties
        );

        // Take the stream first so the first notification cannot slip past
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?;

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Successfully subscribed to notifications from {}", handle.uuid);

        Ok(notifications
            .map(|notification| {
                trace!(
                    "Notification received from {}: {:02X?}",
                    notification.uuid,
                    notification.value
                );
                NotificationEvent {
                    characteristic_uuid: notification.uuid,
                    data: notification.value,
                }
            })
            .boxed())
    }

    /// Unsubscribe from notifications from a characteristic.
    pub async fn unsubscribe(&self, handle: &CharacteristicHandle) -> Result<()> {
        let characteristic = self.characteristic(handle)?;

        self.peripheral
            .unsubscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Unsubscribed from notifications from {}", handle.uuid);

        Ok(())
    }
}
