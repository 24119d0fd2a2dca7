//! Error types for the microbit-temperature-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The Bluetooth adapter is missing, disabled, or never became ready.
    #[error("Bluetooth transport not available")]
    TransportUnavailable,

    /// The peripheral did not expose the requested service.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// The service did not expose the requested characteristic.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// A characteristic payload was too short to decode.
    #[error("Malformed {kind} payload: expected at least {expected} bytes, got {actual}")]
    MalformedPayload {
        /// Which payload was being decoded.
        kind: &'static str,
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes received.
        actual: usize,
    },

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    OperationCancelled,

    /// The transport reported that the peripheral went away.
    #[error("Connection lost")]
    ConnectionLost,

    /// The command is not valid in the current session state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The rejected command.
        operation: &'static str,
        /// The session state at the time of the command.
        state: String,
    },

    /// A transport round trip did not complete in time.
    #[error("Timed out waiting for {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// The scan stream ended without producing a usable peripheral.
    #[error("Scan ended without finding a micro:bit")]
    ScanEnded,

    /// The transport has no record of the requested peripheral.
    #[error("Peripheral not found: {identifier}")]
    PeripheralNotFound {
        /// The identifier that was looked up.
        identifier: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// The session task has stopped and no longer accepts commands.
    #[error("Session closed")]
    SessionClosed,
}

impl Error {
    /// Whether this error only reports a cancellation.
    ///
    /// Cancellations are never surfaced to the user.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::OperationCancelled)
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_payload_message() {
        let err = Error::MalformedPayload {
            kind: "period",
            expected: 2,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "Malformed period payload: expected at least 2 bytes, got 1"
        );
    }

    #[test]
    fn test_is_cancellation() {
        assert!(Error::OperationCancelled.is_cancellation());
        assert!(!Error::ConnectionLost.is_cancellation());
        assert!(!Error::ScanEnded.is_cancellation());
    }

    #[test]
    fn test_invalid_state_message() {
        let err = Error::InvalidState {
            operation: "connect",
            state: "Scanning".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot connect while Scanning");
    }
}
