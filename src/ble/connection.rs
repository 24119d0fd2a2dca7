//! BLE connection management over btleplug.
//!
//! [`BtleplugTransport`] is the production [`Transport`]: it owns the
//! scanner and one [`CharacteristicHandler`] per connected peripheral.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Peripheral as _};
use futures::future;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::characteristics::CharacteristicHandler;
use crate::ble::scanner::BleScanner;
use crate::ble::transport::{
    AdvertisementStream, CharacteristicHandle, ConnectionHandle, DeviceId, NotificationStream,
    ServiceHandle, Transport,
};
use crate::error::{Error, Result};

/// [`Transport`] backed by the platform Bluetooth stack.
pub struct BtleplugTransport {
    /// Scanner owning the adapter.
    scanner: BleScanner,
    /// Handlers for connected peripherals.
    connections: RwLock<HashMap<DeviceId, Arc<CharacteristicHandler>>>,
}

impl BtleplugTransport {
    /// Create a transport on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnavailable`] if there is no adapter.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_scanner(BleScanner::new().await?))
    }

    /// Create a transport around an existing scanner.
    pub fn with_scanner(scanner: BleScanner) -> Self {
        Self {
            scanner,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Get the scanner.
    pub fn scanner(&self) -> &BleScanner {
        &self.scanner
    }

    /// Get the handler of a live connection.
    fn handler(&self, connection: &ConnectionHandle) -> Result<Arc<CharacteristicHandler>> {
        self.connections
            .read()
            .get(&connection.device)
            .cloned()
            .ok_or(Error::ConnectionLost)
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn wait_until_ready(&self) -> Result<()> {
        self.scanner.wait_until_ready().await;
        Ok(())
    }

    async fn scan(&self) -> Result<AdvertisementStream> {
        self.scanner.start_scanning().await
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scanner.stop_scanning().await
    }

    async fn connect(&self, device: &DeviceId) -> Result<ConnectionHandle> {
        let peripheral = self.scanner.peripheral(device)?;

        if peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral {} already connected at BLE level", device);
        } else {
            peripheral.connect().await.map_err(Error::Bluetooth)?;
            info!("Connected to {}", device);
        }

        self.connections.write().insert(
            device.clone(),
            Arc::new(CharacteristicHandler::new(peripheral)),
        );

        Ok(ConnectionHandle {
            device: device.clone(),
        })
    }

    async fn cancel_connection(&self, device: &DeviceId) -> Result<()> {
        let handler = self.connections.write().remove(device);

        let peripheral = match handler {
            Some(handler) => handler.peripheral().clone(),
            None => self.scanner.peripheral(device)?,
        };

        match peripheral.disconnect().await {
            Ok(_) => {
                debug!("Disconnected from {}", device);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to disconnect from {}: {}", device, e);
                Err(Error::Bluetooth(e))
            }
        }
    }

    async fn discover_services(
        &self,
        connection: &ConnectionHandle,
        uuids: &[Uuid],
    ) -> Result<Vec<ServiceHandle>> {
        self.handler(connection)?.discover_services(uuids).await
    }

    async fn discover_characteristics(
        &self,
        connection: &ConnectionHandle,
        service: &ServiceHandle,
        uuids: &[Uuid],
    ) -> Result<Vec<CharacteristicHandle>> {
        self.handler(connection)?
            .discover_characteristics(service, uuids)
            .await
    }

    async fn read(
        &self,
        connection: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<u8>> {
        self.handler(connection)?.read(characteristic).await
    }

    async fn write(
        &self,
        connection: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<()> {
        self.handler(connection)?.write(characteristic, data).await
    }

    async fn subscribe(
        &self,
        connection: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<NotificationStream> {
        let handler = self.handler(connection)?;

        // Some platforms keep the notification stream open after the link
        // drops, so end it on the adapter's disconnect event instead.
        let target = handler.peripheral().id();
        let disconnected = self
            .scanner
            .adapter()
            .events()
            .await
            .map_err(Error::Bluetooth)?
            .filter(move |event| {
                future::ready(matches!(event, CentralEvent::DeviceDisconnected(id) if *id == target))
            })
            .into_future();

        let notifications = handler.subscribe(characteristic).await?;

        Ok(notifications.take_until(disconnected).boxed())
    }

    async fn unsubscribe(
        &self,
        connection: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<()> {
        self.handler(connection)?.unsubscribe(characteristic).await
    }
}
