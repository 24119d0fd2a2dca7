//! Temperature reading type.
//!
//! The micro:bit reports its die temperature as a single signed byte in
//! whole degrees Celsius.

use crate::error::{Error, Result};
use crate::utils::celsius_to_fahrenheit;

/// A temperature reported by the micro:bit, in whole degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TemperatureReading(pub i8);

impl TemperatureReading {
    /// Decode a temperature payload.
    ///
    /// Only the first byte is used; it is interpreted as a two's-complement
    /// signed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPayload`] if `bytes` is empty.
    ///
    /// # Example
    ///
    /// ```
    /// use microbit_temperature_ble::data::TemperatureReading;
    ///
    /// assert_eq!(TemperatureReading::parse(&[0xE2]).unwrap().celsius(), -30);
    /// assert_eq!(TemperatureReading::parse(&[0x19]).unwrap().celsius(), 25);
    /// ```
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match bytes.first() {
            Some(&raw) => Ok(Self(raw as i8)),
            None => Err(Error::MalformedPayload {
                kind: "temperature",
                expected: 1,
                actual: 0,
            }),
        }
    }

    /// Temperature in degrees Celsius.
    pub fn celsius(&self) -> i32 {
        i32::from(self.0)
    }

    /// Temperature in degrees Fahrenheit.
    pub fn to_fahrenheit(&self) -> f64 {
        celsius_to_fahrenheit(f64::from(self.0))
    }
}

impl From<TemperatureReading> for i32 {
    fn from(reading: TemperatureReading) -> Self {
        reading.celsius()
    }
}

impl std::fmt::Display for TemperatureReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°C", self.0)
    }
}

/// Decode a temperature notification or read payload.
pub fn decode_temperature(bytes: &[u8]) -> Result<TemperatureReading> {
    TemperatureReading::parse(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_negative() {
        assert_eq!(decode_temperature(&[0xE2]).unwrap().celsius(), -30);
        assert_eq!(decode_temperature(&[0xFF]).unwrap().celsius(), -1);
        assert_eq!(decode_temperature(&[0x80]).unwrap().celsius(), -128);
    }

    #[test]
    fn test_decode_positive() {
        assert_eq!(decode_temperature(&[0x19]).unwrap().celsius(), 25);
        assert_eq!(decode_temperature(&[0x1A]).unwrap().celsius(), 26);
        assert_eq!(decode_temperature(&[0x7F]).unwrap().celsius(), 127);
        assert_eq!(decode_temperature(&[0x00]).unwrap().celsius(), 0);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        assert_eq!(decode_temperature(&[0x19, 0xFF, 0x00]).unwrap().celsius(), 25);
    }

    #[test]
    fn test_decode_empty_is_malformed() {
        let err = decode_temperature(&[]).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedPayload {
                kind: "temperature",
                expected: 1,
                actual: 0
            }
        ));
    }

    #[test]
    fn test_fahrenheit_and_display() {
        let reading = TemperatureReading(-40);
        assert!((reading.to_fahrenheit() - (-40.0)).abs() < 0.001);
        assert_eq!(TemperatureReading(21).to_string(), "21°C");
        assert_eq!(i32::from(TemperatureReading(-3)), -3);
    }
}
