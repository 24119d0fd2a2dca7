//! BLE Service and Characteristic UUIDs.
//!
//! Contains the identifiers of the micro:bit temperature service.

use uuid::Uuid;

// Temperature Service (micro:bit Bluetooth profile)
/// micro:bit Temperature Service UUID.
pub const TEMPERATURE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0xe95d_6100_251d_470a_a062_fa1922dfa9a8);
/// Temperature characteristic UUID (Read, Notify). One signed byte, °C.
pub const TEMPERATURE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xe95d_9250_251d_470a_a062_fa1922dfa9a8);
/// Temperature period characteristic UUID (Read, Write). Little-endian u16, ms.
pub const TEMPERATURE_PERIOD_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xe95d_1b25_251d_470a_a062_fa1922dfa9a8);

/// Advertised local name prefix of every micro:bit.
pub const DEVICE_NAME_PREFIX: &str = "BBC micro:bit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            TEMPERATURE_SERVICE_UUID.to_string(),
            "e95d6100-251d-470a-a062-fa1922dfa9a8"
        );
        assert_eq!(
            TEMPERATURE_CHARACTERISTIC_UUID.to_string(),
            "e95d9250-251d-470a-a062-fa1922dfa9a8"
        );
        assert_eq!(
            TEMPERATURE_PERIOD_CHARACTERISTIC_UUID.to_string(),
            "e95d1b25-251d-470a-a062-fa1922dfa9a8"
        );
    }

    #[test]
    fn test_parses_uppercase_form() {
        let parsed = Uuid::parse_str("E95D6100-251D-470A-A062-FA1922DFA9A8").unwrap();
        assert_eq!(parsed, TEMPERATURE_SERVICE_UUID);
    }
}
