//! Session configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Tunables for a [`SessionHandle`](crate::SessionHandle).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// How long `connect` waits for the adapter before giving up.
    pub ready_timeout: Duration,
    /// Deadline for a single connection attempt.
    pub connect_timeout: Duration,
    /// Deadline for each discovery, read, write, or subscribe round trip.
    pub operation_timeout: Duration,
    /// Capacity of the command queue.
    pub command_buffer: usize,
    /// Capacity of the temperature broadcast channel.
    pub notification_buffer: usize,
    /// Read the temperature once right after subscribing.
    pub read_initial_temperature: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(5),
            command_buffer: 32,
            notification_buffer: 64,
            read_initial_temperature: false,
        }
    }
}

impl SessionConfig {
    /// Set the adapter readiness timeout.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set the per-attempt connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the GATT round trip timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Enable or disable the initial temperature read.
    pub fn with_initial_temperature_read(mut self, enabled: bool) -> Self {
        self.read_initial_temperature = enabled;
        self
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("ready_timeout", self.ready_timeout),
            ("connect_timeout", self.connect_timeout),
            ("operation_timeout", self.operation_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::InvalidParameter {
                    name: name.to_string(),
                    value: format!("{:?}", value),
                });
            }
        }

        let buffers = [
            ("command_buffer", self.command_buffer),
            ("notification_buffer", self.notification_buffer),
        ];
        for (name, value) in buffers {
            if value == 0 {
                return Err(Error::InvalidParameter {
                    name: name.to_string(),
                    value: value.to_string(),
                });
            }
        }

        Ok(())
    }
}
