//! Temperature notification period.
//!
//! The period characteristic holds the interval, in milliseconds, between
//! temperature notifications. It is a little-endian unsigned 16-bit value.
//! Any value may be written; the peripheral decides what it accepts and
//! the value read back afterwards is authoritative.

use crate::error::{Error, Result};

/// Temperature notification period in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeriodSetting(pub u16);

impl PeriodSetting {
    /// Periods offered to the user, 1000 to 5000 ms in 1000 ms steps.
    pub const CHOICES: [PeriodSetting; 5] = [
        PeriodSetting(1000),
        PeriodSetting(2000),
        PeriodSetting(3000),
        PeriodSetting(4000),
        PeriodSetting(5000),
    ];

    /// Create a period from any integer, keeping only the low 16 bits.
    pub fn from_millis_truncating(value: u32) -> Self {
        Self((value & 0xFFFF) as u16)
    }

    /// Decode a period payload (`bytes[0] + bytes[1] * 256`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPayload`] if fewer than two bytes are present.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [low, high, ..] => Ok(Self(u16::from_le_bytes([*low, *high]))),
            _ => Err(Error::MalformedPayload {
                kind: "period",
                expected: 2,
                actual: bytes.len(),
            }),
        }
    }

    /// Encode as the two-byte payload, low byte first.
    pub fn to_bytes(&self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Period in milliseconds.
    pub fn millis(&self) -> u16 {
        self.0
    }

    /// Period as a [`Duration`](std::time::Duration).
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::from(self.0))
    }
}

impl From<u16> for PeriodSetting {
    fn from(millis: u16) -> Self {
        Self(millis)
    }
}

impl std::fmt::Display for PeriodSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ms", self.0)
    }
}

/// Decode a period read payload.
pub fn decode_period(bytes: &[u8]) -> Result<PeriodSetting> {
    PeriodSetting::parse(bytes)
}

/// Encode a period for writing, truncating to 16 bits.
///
/// ```
/// use microbit_temperature_ble::data::encode_period;
///
/// assert_eq!(encode_period(3000), [0xB8, 0x0B]);
/// assert_eq!(encode_period(0x1_0001), [0x01, 0x00]);
/// ```
pub fn encode_period(value: u32) -> [u8; 2] {
    PeriodSetting::from_millis_truncating(value).to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_period() {
        assert_eq!(decode_period(&[0xE8, 0x03]).unwrap(), PeriodSetting(1000));
        assert_eq!(decode_period(&[0xD0, 0x07]).unwrap(), PeriodSetting(2000));
        assert_eq!(decode_period(&[0xFF, 0xFF]).unwrap(), PeriodSetting(u16::MAX));
    }

    #[test]
    fn test_encode_period() {
        assert_eq!(encode_period(3000), [0xB8, 0x0B]);
        assert_eq!(encode_period(1000), [0xE8, 0x03]);
        assert_eq!(encode_period(0), [0x00, 0x00]);
    }

    #[test]
    fn test_encode_truncates_to_16_bits() {
        assert_eq!(encode_period(65_536), [0x00, 0x00]);
        assert_eq!(encode_period(70_000), encode_period(70_000 - 65_536));
    }

    #[test]
    fn test_decode_short_payload_is_malformed() {
        for bytes in [&[][..], &[0xE8][..]] {
            let err = decode_period(bytes).unwrap_err();
            assert!(matches!(
                err,
                Error::MalformedPayload {
                    kind: "period",
                    expected: 2,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_choices() {
        let millis: Vec<u16> = PeriodSetting::CHOICES.iter().map(|p| p.millis()).collect();
        assert_eq!(millis, vec![1000, 2000, 3000, 4000, 5000]);
        assert_eq!(PeriodSetting(1500).to_string(), "1500 ms");
        assert_eq!(
            PeriodSetting(1500).as_duration(),
            std::time::Duration::from_millis(1500)
        );
    }

    proptest! {
        #[test]
        fn prop_period_round_trip(value in 0u32..=65_535) {
            prop_assert_eq!(u32::from(decode_period(&encode_period(value)).unwrap().millis()), value);
        }
    }
}
