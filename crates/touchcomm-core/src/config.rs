//! Protocol timing and retry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TcmError;
use crate::protocol::constants::COMMAND_RETRY_LIMIT;

/// Tunables for one protocol engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Upper bound on one full command/response exchange, in ms.
    pub command_timeout_ms: u64,
    /// Polling interval when waiting for a response without interrupts,
    /// in ms. Values below 100 are clamped up to avoid hammering the bus.
    pub polling_interval_ms: u64,
    /// How many times a corrupted packet is re-exchanged before giving up.
    pub retry_limit: u32,
    /// Bus turnaround pause between a write and the follow-up read, in us.
    pub turnaround_delay_us: u64,
    /// Pause before re-sending a corrupted chunk, in us.
    pub retry_delay_us: u64,
    /// Settle time granted to the device after a reset command, in ms.
    pub reset_delay_ms: u64,
    /// Opportunistically fetch payload bytes together with the header
    /// when polling for reports.
    pub predict_reads: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 3000,
            polling_interval_ms: 100,
            retry_limit: COMMAND_RETRY_LIMIT,
            turnaround_delay_us: 300,
            retry_delay_us: 1500,
            reset_delay_ms: 200,
            predict_reads: false,
        }
    }
}

impl ProtocolConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, TcmError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TcmError::InvalidArgument(format!("config read failed: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| TcmError::InvalidArgument(format!("config parse failed: {e}")))
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), TcmError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TcmError::InvalidArgument(format!("config encode failed: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| TcmError::InvalidArgument(format!("config write failed: {e}")))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Polling interval with the 100ms floor applied.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms.max(100))
    }

    pub fn turnaround_delay(&self) -> Duration {
        Duration::from_micros(self.turnaround_delay_us)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_micros(self.retry_delay_us)
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }
}
