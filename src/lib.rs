// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # microbit-temperature-ble
//!
//! A cross-platform Rust library for reading the temperature of a BBC
//! micro:bit over Bluetooth Low Energy.
//!
//! The micro:bit exposes a temperature service with two characteristics:
//! a one-byte temperature in whole degrees Celsius, delivered as
//! notifications, and a two-byte little-endian notification period in
//! milliseconds. A session scans for the first device advertising a name
//! that starts with `BBC micro:bit`, connects, discovers both
//! characteristics, reads the period and subscribes to temperatures.
//!
//! ## Features
//!
//! - **Discovery**: Connect to the first micro:bit found, falling back to
//!   the next candidate if setup fails
//! - **Live Temperatures**: Every notification is decoded and published
//! - **Period Control**: Write and read back the notification period
//! - **Cancellation**: Abandon a scan, connect, or write at any point
//! - **Observable State**: Watch a single state record from any task
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use microbit_temperature_ble::{Result, SessionConfig, SessionHandle, SessionState};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = SessionHandle::with_btleplug(SessionConfig::default()).await?;
//!     session.connect().await?;
//!
//!     let mut state = session.state();
//!     let ready = state.wait_for(|s| s.session.is_ready() || s.last_error.is_some()).await;
//!     if let Ok(ready) = ready {
//!         if ready.session == SessionState::Ready {
//!             println!("Connected to {:?}", ready.peripheral_name);
//!         }
//!     }
//!
//!     let mut temperatures = session.subscribe_temperatures();
//!     while let Ok(update) = temperatures.recv().await {
//!         println!("Temperature: {}", update.temperature);
//!     }
//!
//!     session.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod callback;
pub mod config;
pub mod data;
pub mod error;
pub mod session;
pub mod state;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use callback::CallbackHandle;
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use session::SessionHandle;
pub use state::{ObservableState, SessionState, TemperatureUpdate};
pub use utils::{celsius_to_fahrenheit, is_microbit_name};

// Re-export commonly used types from submodules
pub use ble::{BtleplugTransport, DeviceId, Transport};
pub use data::{decode_period, decode_temperature, encode_period, PeriodSetting, TemperatureReading};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<SessionHandle>();
        let _ = std::any::TypeId::of::<SessionConfig>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<ObservableState>();
        let _ = std::any::TypeId::of::<TemperatureReading>();
        let _ = std::any::TypeId::of::<PeriodSetting>();
        let _ = std::any::TypeId::of::<BtleplugTransport>();
    }

    #[test]
    fn test_codecs_exported() {
        assert_eq!(encode_period(1500), [0xDC, 0x05]);
        assert_eq!(decode_period(&[0xDC, 0x05]).unwrap(), PeriodSetting(1500));
        assert_eq!(decode_temperature(&[0xE2]).unwrap().celsius(), -30);
    }
}
