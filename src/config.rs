//! Drive configuration.
//!
//! Timing constants for the connection state machine plus the content
//! detection settings (marker bytes, recognized file extensions). All
//! fields have defaults matching the reference hardware, so an empty TOML
//! table is a valid configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} ({value}ms) must be strictly below max_event_time_ms ({max}ms)")]
    DelayTooLarge {
        name: &'static str,
        value: u32,
        max: u32,
    },
}

/// Configuration for the virtual drive core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriveConfig {
    /// Delay before a hidden drive becomes visible to the host.
    pub connect_delay_ms: u32,

    /// Delay spent hidden during a remount cycle. Long enough that every
    /// host OS notices the drive actually went away.
    pub reconnect_delay_ms: u32,

    /// Host idle time after which an in-progress transfer is abandoned.
    pub disconnect_delay_transfer_timeout_ms: u32,

    /// Host idle time after which a transfer that looks complete is
    /// finalized.
    pub disconnect_delay_transfer_idle_ms: u32,

    /// Disconnect delay when no transfer is being tracked.
    pub disconnect_delay_default_ms: u32,

    /// Cap on the idle-time accumulator. Every transition delay must be
    /// strictly below this.
    pub max_event_time_ms: u32,

    /// Two-byte marker a settings document must start with.
    pub settings_marker: [u8; 2],

    /// File extensions treated as settings documents in directory events.
    pub settings_extensions: Vec<String>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            connect_delay_ms: 0,
            reconnect_delay_ms: 2500,
            disconnect_delay_transfer_timeout_ms: 500,
            disconnect_delay_transfer_idle_ms: 500,
            disconnect_delay_default_ms: 500,
            max_event_time_ms: 60_000,
            settings_marker: *b"##",
            settings_extensions: vec!["INI".to_string()],
        }
    }
}

impl DriveConfig {
    /// Check that every transition delay fits under the idle-time cap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let delays = [
            ("connect_delay_ms", self.connect_delay_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            (
                "disconnect_delay_transfer_timeout_ms",
                self.disconnect_delay_transfer_timeout_ms,
            ),
            (
                "disconnect_delay_transfer_idle_ms",
                self.disconnect_delay_transfer_idle_ms,
            ),
            (
                "disconnect_delay_default_ms",
                self.disconnect_delay_default_ms,
            ),
        ];

        for (name, value) in delays {
            if value >= self.max_event_time_ms {
                return Err(ConfigError::DelayTooLarge {
                    name,
                    value,
                    max: self.max_event_time_ms,
                });
            }
        }
        Ok(())
    }
}
