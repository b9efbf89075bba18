use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Loader settings. Missing keys take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Read the patch back after writing it.
    pub verify_write: bool,
    /// Re-run the sequence when the host releases the target from reset.
    pub load_on_reset_signal: bool,
    /// The target is the TAP emulator, so the power-good and ID polls are
    /// skipped. The bus-ready poll still runs; the emulated backend
    /// answers it at once.
    pub emulated: bool,
    /// Byte address callers place the patch at when building the
    /// [`BootPatch`](crate::patch::BootPatch). The sequencer itself only
    /// writes to the patch's own base.
    pub patch_offset: u32,
    pub expected_id: u32,
    /// Bounds for the bring-up polls. `None` waits forever.
    pub power_good_timeout_ms: Option<u64>,
    pub id_timeout_ms: Option<u64>,
    pub bus_ready_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verify_write: true,
            load_on_reset_signal: true,
            emulated: false,
            patch_offset: 0x80,
            expected_id: 0x138A5,
            power_good_timeout_ms: None,
            id_timeout_ms: None,
            bus_ready_timeout_ms: None,
        }
    }
}

impl Config {
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn power_good_timeout(&self) -> Option<Duration> {
        self.power_good_timeout_ms.map(Duration::from_millis)
    }

    pub fn id_timeout(&self) -> Option<Duration> {
        self.id_timeout_ms.map(Duration::from_millis)
    }

    pub fn bus_ready_timeout(&self) -> Option<Duration> {
        self.bus_ready_timeout_ms.map(Duration::from_millis)
    }
}
