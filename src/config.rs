//! Configuration file handling

use crate::actuator::DEFAULT_PWM_CHIP;
use crate::controller::ControlMode;
use crate::curve::ControlThresholds;
use crate::errors::{Result, ThermoPiError};
use crate::sensor::DEFAULT_THERMAL_ZONE;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PwmConfig {
    /// BCM GPIO number the fan's PWM line is wired to
    pub pin: u8,
    pub frequency_hz: u32,
    pub chip: PathBuf,
    /// Channel on `chip`; derived from `pin` when unset
    pub channel: Option<u32>,
    pub settle_ms: u64,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            pin: 18,
            frequency_hz: 25_000,
            chip: PathBuf::from(DEFAULT_PWM_CHIP),
            channel: None,
            settle_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub path: PathBuf,
    pub read_timeout_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_THERMAL_ZONE),
            read_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub interval_ms: u64,
    /// Consecutive failed ticks after which the loop stops and turns the fan off
    pub max_consecutive_failures: u32,
    pub initial_mode: ControlMode,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_consecutive_failures: 3,
            initial_mode: ControlMode::Automatic,
        }
    }
}

impl ControlConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Run against a simulated PWM output when the real one cannot be claimed
    pub allow_actuator_fallback: bool,
    /// Fabricate temperatures instead of reading the sensor
    pub fake_sensor: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pwm: PwmConfig,
    pub sensor: SensorConfig,
    pub thresholds: ControlThresholds,
    pub control: ControlConfig,
    /// Per-tick sample log; `None` disables it
    pub sample_log: Option<PathBuf>,
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pwm: PwmConfig::default(),
            sensor: SensorConfig::default(),
            thresholds: ControlThresholds::default(),
            control: ControlConfig::default(),
            sample_log: Some(PathBuf::from("fan_control_log.txt")),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".thermopi").join("config.json")
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            Self::load_from_file(path)
        } else {
            debug!("No configuration at {}; using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write atomically via a temporary file in the same directory
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json)?;
        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Checks that serde cannot express. Thresholds validate themselves on load.
    pub fn validate(&self) -> Result<()> {
        if self.pwm.frequency_hz == 0 {
            return Err(ThermoPiError::Config("pwm.frequency_hz must be above 0".to_string()));
        }
        if self.control.interval_ms == 0 {
            return Err(ThermoPiError::Config("control.interval_ms must be above 0".to_string()));
        }
        if self.control.max_consecutive_failures == 0 {
            return Err(ThermoPiError::Config(
                "control.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.sensor.read_timeout_ms == 0 {
            return Err(ThermoPiError::Config("sensor.read_timeout_ms must be above 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_setup() {
        let config = Config::default();
        assert_eq!(config.pwm.pin, 18);
        assert_eq!(config.pwm.frequency_hz, 25_000);
        assert_eq!(config.thresholds, ControlThresholds::new(50.0, 65.0, 20, 80).unwrap());
        assert_eq!(config.control.interval(), Duration::from_secs(1));
        assert_eq!(config.control.max_consecutive_failures, 3);
        assert!(!config.simulation.allow_actuator_fallback);
        assert!(!config.simulation.fake_sensor);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"pwm": {"pin": 12}, "control": {"initial_mode": "manual"}}"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.pwm.pin, 12);
        assert_eq!(config.pwm.frequency_hz, 25_000);
        assert_eq!(config.control.initial_mode, ControlMode::Manual);
        assert_eq!(config.control.interval_ms, 1000);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"thresholds": {"temp_min": 70.0, "temp_max": 60.0, "speed_min": 20, "speed_max": 80}}"#,
        )
        .unwrap();
        assert!(Config::load_from_file(&path).is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.control.interval_ms = 0;
        assert!(matches!(config.validate(), Err(ThermoPiError::Config(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.simulation.fake_sensor = true;
        config.sample_log = None;

        config.save_to_file(&path).unwrap();
        assert_eq!(Config::load_or_default(&path).unwrap(), config);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }
}
