//! BLE communication module.
//!
//! This module provides the transport abstraction the session runs on and
//! its btleplug implementation.

pub mod characteristics;
pub mod connection;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use characteristics::CharacteristicHandler;
pub use connection::BtleplugTransport;
pub use scanner::BleScanner;
pub use transport::{
    Advertisement, AdvertisementStream, CharacteristicHandle, ConnectionHandle, DeviceId,
    NotificationEvent, NotificationStream, ServiceHandle, Transport,
};
pub use uuids::*;
