//! Error types for the fan controller

use crate::controller::ControlMode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for the fan controller
pub type Result<T> = std::result::Result<T, ThermoPiError>;

/// Failures of the PWM output and its hardware claim
#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("PWM output not initialized")]
    NotInitialized,

    #[error("Could not claim PWM output for GPIO {pin}: {reason}")]
    Claim { pin: u8, reason: String },

    #[error("GPIO {0} has no hardware PWM channel (use 12, 13, 18 or 19, or set pwm.channel)")]
    UnsupportedPin(u8),

    #[error("PWM write to {} failed: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures reading the thermal sensor
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Temperature sensor unavailable at {}: {source}", .path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unparsable temperature value {raw:?} from {}", .path.display())]
    Unparsable { path: PathBuf, raw: String },

    #[error("Temperature reading out of range from {}: {celsius:.1}°C", .path.display())]
    OutOfRange { path: PathBuf, celsius: f64 },

    #[error("Temperature read from {} timed out after {after:?}", .path.display())]
    Timeout { path: PathBuf, after: Duration },
}

/// Failure of a single controller operation
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Sensor read failed: {0}")]
    Sensor(#[from] SensorError),

    #[error("Actuator write failed: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Manual speed rejected while in {mode} mode")]
    ManualSpeedRejected { mode: ControlMode },

    #[error("Control loop is not running")]
    LoopStopped,
}

/// Top-level error type for the fan controller
#[derive(Error, Debug)]
pub enum ThermoPiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Control(#[from] ControlError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_name_the_failing_path() {
        let err = SensorError::Unparsable {
            path: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            raw: "garbage".to_string(),
        };
        let message = ControlError::from(err).to_string();
        assert!(message.contains("thermal_zone0"));
        assert!(message.contains("garbage"));
    }

    #[test]
    fn test_manual_rejection_names_mode() {
        let err = ControlError::ManualSpeedRejected {
            mode: ControlMode::Automatic,
        };
        assert_eq!(err.to_string(), "Manual speed rejected while in Automatic mode");
    }
}
