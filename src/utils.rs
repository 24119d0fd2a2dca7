//! Utility functions for the microbit-temperature-ble crate.

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use microbit_temperature_ble::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(100.0);
/// assert!((fahrenheit - 212.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Check whether an advertised local name belongs to a micro:bit.
///
/// Matching is a plain, case-sensitive prefix test against
/// [`DEVICE_NAME_PREFIX`](crate::ble::uuids::DEVICE_NAME_PREFIX).
#[inline]
pub fn is_microbit_name(name: &str) -> bool {
    name.starts_with(crate::ble::uuids::DEVICE_NAME_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_to_fahrenheit() {
        assert!((celsius_to_fahrenheit(0.0) - 32.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(-40.0) - (-40.0)).abs() < 0.001);
        assert!((celsius_to_fahrenheit(-30.0) - (-22.0)).abs() < 0.001);
    }

    #[test]
    fn test_is_microbit_name() {
        assert!(is_microbit_name("BBC micro:bit"));
        assert!(is_microbit_name("BBC micro:bit [zavog]"));
        assert!(!is_microbit_name("bbc micro:bit [zavog]"));
        assert!(!is_microbit_name("My BBC micro:bit"));
        assert!(!is_microbit_name("BBC micro"));
        assert!(!is_microbit_name(""));
    }
}
