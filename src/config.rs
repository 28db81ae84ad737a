use crate::protocol::{timing, Channel};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Cluster parameters installed into a controller by `configure`.
///
/// Fields missing from a JSON document take their default values, so a file
/// containing only `{"static_slots": 32}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bit rate in bit/s.
    pub baudrate: u32,
    pub static_slots: u16,
    pub dynamic_slots: u16,
    /// Default payload length in 16-bit words.
    pub payload_length: u8,
    /// Communication cycle in microseconds.
    pub cycle_duration: u32,
    /// Network idle time in microseconds.
    pub network_idle_time: u32,
    pub channel: Channel,
    pub wakeup_symbol_rx_low: u16,
    pub wakeup_symbol_rx_window: u16,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            baudrate: 10_000_000,
            static_slots: 64,
            dynamic_slots: 128,
            payload_length: 32,
            cycle_duration: timing::GD_CYCLE_US,
            network_idle_time: timing::GD_NIT_US,
            channel: Channel::AB,
            wakeup_symbol_rx_low: 18,
            wakeup_symbol_rx_window: 76,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl BusConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Default payload length converted from words to bytes.
    pub fn payload_length_bytes(&self) -> usize {
        usize::from(self.payload_length) * 2
    }

    /// Duration of the static segment assuming the default static slot length.
    pub fn static_segment_us(&self) -> u32 {
        u32::from(self.static_slots) * timing::GD_STATIC_SLOT_US
    }
}
