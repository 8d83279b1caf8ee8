//! Simulator configuration
//!
//! All fields have defaults matching the real devices, so a configuration file
//! only needs the values it wants to change.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

fn default_baud() -> u32 {
    38400
}

fn default_read_timeout_ms() -> u64 {
    1000
}

/// Serial line settings (8N1 framing is fixed)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    /// Serial port path
    #[serde(default)]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    /// How long a read blocks before the loop retries
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl SerialConfig {
    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

/// STN1110 adapter timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StnConfig {
    /// Delay between `ATZ` and the identification line
    pub reset_delay_ms: u64,
    /// Delay between bursts of monitor lines
    pub monitor_interval_ms: u64,
}

impl StnConfig {
    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

impl Default for StnConfig {
    fn default() -> Self {
        Self {
            reset_delay_ms: 1000,
            monitor_interval_ms: 100,
        }
    }
}

/// u-blox receiver settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UbloxConfig {
    /// Maximum bytes taken from the port per read
    pub read_size: usize,
    /// Bytes of noise written per iteration before configuration
    pub noise_len: usize,
}

impl Default for UbloxConfig {
    fn default() -> Self {
        Self {
            read_size: 128,
            noise_len: 128,
        }
    }
}

/// Complete simulator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulatorConfig {
    pub serial: SerialConfig,
    pub stn: StnConfig,
    pub ublox: UbloxConfig,
}

impl SimulatorConfig {
    /// Load a JSON configuration file
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let content = std::fs::read_to_string(path).map_err(|e| SimError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| SimError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate().map_err(|reason| SimError::Config {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    /// Check values that deserialize fine but cannot be served
    pub fn validate(&self) -> Result<(), String> {
        if self.ublox.read_size == 0 {
            return Err("ublox.read_size must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulatorConfig::default();
        assert_eq!(config.serial.baud_rate, 38400);
        assert_eq!(config.serial.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.stn.reset_delay(), Duration::from_secs(1));
        assert_eq!(config.stn.monitor_interval(), Duration::from_millis(100));
        assert_eq!(config.ublox.read_size, 128);
        assert_eq!(config.ublox.noise_len, 128);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SimulatorConfig =
            serde_json::from_str(r#"{"serial": {"port": "/dev/pts/3"}, "stn": {"reset_delay_ms": 10}}"#)
                .unwrap();
        assert_eq!(config.serial.port, "/dev/pts/3");
        assert_eq!(config.serial.baud_rate, 38400);
        assert_eq!(config.stn.reset_delay_ms, 10);
        assert_eq!(config.stn.monitor_interval_ms, 100);
        assert_eq!(config.ublox, UbloxConfig::default());
    }

    #[test]
    fn test_zero_read_size_rejected() {
        let mut config = SimulatorConfig::default();
        assert!(config.validate().is_ok());

        config.ublox.read_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_rejects_zero_read_size() {
        let path = std::env::temp_dir().join(format!("hwsim-read-size-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"ublox": {"read_size": 0}}"#).unwrap();

        let result = SimulatorConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        match result {
            Err(SimError::Config { reason, .. }) => assert!(reason.contains("read_size")),
            other => panic!("expected a config error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = SimulatorConfig::load(Path::new("/nonexistent/hwsim.json")).unwrap_err();
        assert!(matches!(err, SimError::Config { .. }));
    }
}
