//! # Configuration
//!
//! YAML configuration for the PV PI tools. Every field has a default, so an
//! empty file (or no file at all) is a valid configuration.
//!
//! ## Search Path
//!
//! When no `--config` is given, the first file found is loaded:
//! 1. Path in the `PVPI_CONFIG` environment variable
//! 2. `./pvpi.yaml`
//! 3. `/etc/pvpi/config.yaml`
//!
//! ## Example
//!
//! ```yaml
//! device:
//!   port: /dev/ttyAMA0
//!   baud_rate: 115200
//!
//! power:
//!   log_period_mins: 5
//!   low_battery_voltage: 12.5
//!   schedule_enabled: true
//!   shutdown_time: "22:00"
//!   wakeup_time: "08:00"
//!   watchdog_enabled: true
//!   clock_sync: pi_to_mcu
//!
//! telemetry:
//!   enabled: true
//!   directory: /var/lib/pvpi
//!   retention_days: 7
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use pvpi_client::{POWER_OFF_DELAY_RANGE, WAKEUP_VOLTAGE_RANGE, WATCHDOG_PERIOD_RANGE};
use pvpi_link::{BrokerConfig, RemoteConfig, SerialConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, ManagerResult};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "PVPI_CONFIG";

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port path.
    pub port: String,
    pub baud_rate: u32,
    /// Per-exchange timeout, seconds.
    pub timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let serial = SerialConfig::default();
        Self {
            port: serial.port,
            baud_rate: serial.baud_rate,
            timeout_secs: serial.timeout.as_secs(),
        }
    }
}

impl DeviceConfig {
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Broker endpoint settings, used by both the broker and its clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Listen / connect address.
    pub addr: String,
    pub connect_timeout_ms: u64,
    pub reply_timeout_secs: u64,
    /// Inbound request queue depth.
    pub queue_depth: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        let broker = BrokerConfig::default();
        let remote = RemoteConfig::default();
        Self {
            addr: broker.bind_addr,
            connect_timeout_ms: remote.connect_timeout.as_millis() as u64,
            reply_timeout_secs: remote.reply_timeout.as_secs(),
            queue_depth: broker.queue_depth,
        }
    }
}

impl BrokerSettings {
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            bind_addr: self.addr.clone(),
            queue_depth: self.queue_depth,
        }
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            addr: self.addr.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reply_timeout: Duration::from_secs(self.reply_timeout_secs),
            identity: None,
        }
    }
}

/// Which clock is the reference at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSync {
    /// Leave both clocks alone.
    #[default]
    None,
    /// Set the MCU clock from the host clock.
    PiToMcu,
    /// Set the host clock from the MCU clock (needs root).
    McuToPi,
}

/// System manager behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Minutes between telemetry polls.
    pub log_period_mins: u32,
    /// Seconds between schedule checks.
    pub check_interval_secs: u64,
    /// Delay the MCU waits before cutting power, seconds.
    pub off_delay_secs: u32,
    /// Wait after setup before monitoring starts, seconds.
    pub startup_delay_secs: u64,
    /// Shut down at or below this battery voltage.
    pub low_battery_voltage: f64,

    /// Shut down at `shutdown_time` and wake at `wakeup_time`.
    pub schedule_enabled: bool,
    #[serde(with = "time_of_day")]
    pub shutdown_time: NaiveTime,
    #[serde(with = "time_of_day")]
    pub wakeup_time: NaiveTime,

    pub watchdog_enabled: bool,
    /// Watchdog period in minutes. Defaults to twice the log period.
    pub watchdog_period_mins: Option<u32>,

    pub clock_sync: ClockSync,
    /// Wake-up threshold to program at startup, volts.
    pub wakeup_voltage: Option<f64>,
    /// Consecutive unreadable polls tolerated before shutting down.
    pub max_failed_polls: u32,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            log_period_mins: 5,
            check_interval_secs: 30,
            off_delay_secs: 20,
            startup_delay_secs: 20,
            low_battery_voltage: 12.5,
            schedule_enabled: false,
            shutdown_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
            wakeup_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            watchdog_enabled: false,
            watchdog_period_mins: None,
            clock_sync: ClockSync::None,
            wakeup_voltage: None,
            max_failed_polls: 3,
        }
    }
}

impl PowerConfig {
    /// Watchdog period actually used.
    pub fn watchdog_period(&self) -> u32 {
        self.watchdog_period_mins
            .unwrap_or_else(|| self.log_period_mins.saturating_mul(2))
    }

    pub fn log_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.log_period_mins) * 60)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Validate the power settings.
    pub fn validate(&self) -> ManagerResult<()> {
        let invalid = |msg: String| -> ManagerResult<()> { Err(ManagerError::InvalidConfig(msg)) };

        if self.log_period_mins == 0 {
            return invalid("log_period_mins must be > 0".to_string());
        }
        if self.check_interval_secs == 0 {
            return invalid("check_interval_secs must be > 0".to_string());
        }
        if self.watchdog_enabled && !WATCHDOG_PERIOD_RANGE.contains(&self.watchdog_period()) {
            return invalid(format!(
                "watchdog period {} min must be 1-60 (set watchdog_period_mins when log_period_mins > 30)",
                self.watchdog_period()
            ));
        }
        if !POWER_OFF_DELAY_RANGE.contains(&self.off_delay_secs) {
            return invalid(format!("off_delay_secs {} must be 1-60", self.off_delay_secs));
        }
        if let Some(volts) = self.wakeup_voltage {
            if !WAKEUP_VOLTAGE_RANGE.contains(&volts) {
                return invalid(format!("wakeup_voltage {} must be 11.5-14.4", volts));
            }
        }
        if !(self.low_battery_voltage > 0.0) {
            return invalid("low_battery_voltage must be positive".to_string());
        }
        if self.max_failed_polls == 0 {
            return invalid("max_failed_polls must be > 0".to_string());
        }
        Ok(())
    }
}

/// Telemetry log settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Directory of daily CSV files.
    pub directory: PathBuf,
    /// Days of files to keep.
    pub retention_days: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("/var/lib/pvpi"),
            retention_days: 7,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PvPiConfig {
    pub device: DeviceConfig,
    pub broker: BrokerSettings,
    pub power: PowerConfig,
    pub telemetry: TelemetryConfig,
}

impl PvPiConfig {
    /// Load from the search path, or defaults when no file exists.
    pub fn load() -> ManagerResult<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load_from(Path::new(&path));
        }
        for path in Self::config_search_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> ManagerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ManagerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> ManagerResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Render as YAML.
    pub fn to_yaml(&self) -> ManagerResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn config_search_paths() -> Vec<PathBuf> {
        vec![
            PathBuf::from("./pvpi.yaml"),
            PathBuf::from("/etc/pvpi/config.yaml"),
        ]
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ManagerResult<()> {
        if self.device.baud_rate == 0 {
            return Err(ManagerError::InvalidConfig("baud_rate must be > 0".to_string()));
        }
        if self.device.timeout_secs == 0 {
            return Err(ManagerError::InvalidConfig("timeout_secs must be > 0".to_string()));
        }
        self.power.validate()
    }
}

/// `"HH:MM"` / `"HH:MM:SS"` times of day.
mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
            .map_err(|_| serde::de::Error::custom(format!("invalid time of day {:?}, expected HH:MM", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PvPiConfig::default();
        config.validate().unwrap();
        assert_eq!(config.power.log_period_mins, 5);
        assert_eq!(config.power.watchdog_period(), 10);
        assert_eq!(config.power.check_interval(), Duration::from_secs(30));
        assert_eq!(config.device.port, "/dev/ttyAMA0");
        assert_eq!(config.broker.addr, "127.0.0.1:5555");
        assert_eq!(config.telemetry.retention_days, 7);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
power:
  schedule_enabled: true
  shutdown_time: "21:30"
  wakeup_time: "07:15:30"
  clock_sync: mcu_to_pi
telemetry:
  enabled: true
  directory: /tmp/pvpi
"#;
        let config = PvPiConfig::parse(yaml).unwrap();
        assert!(config.power.schedule_enabled);
        assert_eq!(config.power.shutdown_time, NaiveTime::from_hms_opt(21, 30, 0).unwrap());
        assert_eq!(config.power.wakeup_time, NaiveTime::from_hms_opt(7, 15, 30).unwrap());
        assert_eq!(config.power.clock_sync, ClockSync::McuToPi);
        assert_eq!(config.power.low_battery_voltage, 12.5);
        assert_eq!(config.telemetry.directory, PathBuf::from("/tmp/pvpi"));
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = PvPiConfig::default();
        config.power.wakeup_voltage = Some(12.8);
        let parsed = PvPiConfig::parse(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(PvPiConfig::parse("power:\n  shutdown_time: \"25:00\"\n").is_err());
        assert!(PvPiConfig::parse("bogus: 1\n").is_err());

        let mut power = PowerConfig::default();
        power.log_period_mins = 0;
        assert!(power.validate().is_err());

        let mut power = PowerConfig {
            watchdog_enabled: true,
            log_period_mins: 31,
            ..Default::default()
        };
        assert!(power.validate().is_err());
        power.watchdog_period_mins = Some(45);
        power.validate().unwrap();

        let power = PowerConfig {
            off_delay_secs: 61,
            ..Default::default()
        };
        assert!(power.validate().is_err());

        let power = PowerConfig {
            wakeup_voltage: Some(14.5),
            ..Default::default()
        };
        assert!(power.validate().is_err());

        let power = PowerConfig {
            low_battery_voltage: 0.0,
            ..Default::default()
        };
        assert!(power.validate().is_err());
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(PvPiConfig::parse("").unwrap(), PvPiConfig::default());
    }
}
