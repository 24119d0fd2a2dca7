//! Transport abstraction over a BLE central.
//!
//! The session state machine talks to the radio only through [`Transport`].
//! Every primitive is either a one-shot async call or an async stream, and
//! all handles are plain values so the session can own them outright.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;

/// Transport-level identifier of a peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create an identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One advertisement observed while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// The advertising peripheral.
    pub id: DeviceId,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// An established connection to a peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    /// The connected peripheral.
    pub device: DeviceId,
}

/// A discovered GATT service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    /// The service UUID.
    pub uuid: Uuid,
}

/// A discovered GATT characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    /// The characteristic UUID.
    pub uuid: Uuid,
    /// The UUID of the service that owns the characteristic.
    pub service_uuid: Uuid,
}

/// Notification event from a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic_uuid: Uuid,
    /// The notification data.
    pub data: Vec<u8>,
}

/// Stream of advertisements. Ends only if the transport stops scanning on its own.
pub type AdvertisementStream = BoxStream<'static, Advertisement>;

/// Stream of notifications for one connection. Ends when the link is lost.
pub type NotificationStream = BoxStream<'static, NotificationEvent>;

/// The BLE central primitives used by the session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Resolve once the adapter is powered and usable.
    ///
    /// Fails with [`Error::TransportUnavailable`](crate::Error::TransportUnavailable)
    /// when it never becomes ready.
    async fn wait_until_ready(&self) -> Result<()>;

    /// Start an unbounded scan.
    async fn scan(&self) -> Result<AdvertisementStream>;

    /// Stop any running scan.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to an advertised peripheral.
    async fn connect(&self, device: &DeviceId) -> Result<ConnectionHandle>;

    /// Cancel a connection or a pending connection attempt.
    async fn cancel_connection(&self, device: &DeviceId) -> Result<()>;

    /// Discover the services with the given UUIDs.
    async fn discover_services(
        &self,
        connection: &ConnectionHandle,
        uuids: &[Uuid],
    ) -> Result<Vec<ServiceHandle>>;

    /// Discover the characteristics with the given UUIDs on one service.
    async fn discover_characteristics(
        &self,
        connection: &ConnectionHandle,
        service: &ServiceHandle,
        uuids: &[Uuid],
    ) -> Result<Vec<CharacteristicHandle>>;

    /// Read a characteristic value.
    async fn read(
        &self,
        connection: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<u8>>;

    /// Write a characteristic value, waiting for the response.
    async fn write(
        &self,
        connection: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
        data: &[u8],
    ) -> Result<()>;

    /// Enable notifications and return the connection's notification stream.
    async fn subscribe(
        &self,
        connection: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<NotificationStream>;

    /// Disable notifications.
    async fn unsubscribe(
        &self,
        connection: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::new("hci0/dev_E4_12_34");
        assert_eq!(id.to_string(), "hci0/dev_E4_12_34");
        assert_eq!(id.as_str(), "hci0/dev_E4_12_34");
    }

    #[test]
    fn test_handles_are_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<Advertisement>();
        assert_clone::<ConnectionHandle>();
        assert_clone::<CharacteristicHandle>();
        assert_clone::<NotificationEvent>();
    }
}
