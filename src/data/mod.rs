//! Data structures for micro:bit temperature service payloads.
//!
//! This module contains the types and pure codecs for the two
//! characteristics of the temperature service.

pub mod period;
pub mod temperature;

pub use period::{decode_period, encode_period, PeriodSetting};
pub use temperature::{decode_temperature, TemperatureReading};
