//! Temperature to duty-cycle mapping

use crate::errors::{Result, ThermoPiError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A duty-cycle command in percent, always within 0..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "u8")]
pub struct FanCommand(u8);

impl FanCommand {
    pub const OFF: FanCommand = FanCommand(0);
    pub const FULL: FanCommand = FanCommand(100);

    /// Build a command from any integer percentage, clamping into 0..=100
    pub fn clamped(percent: i32) -> Self {
        Self(percent.clamp(0, 100) as u8)
    }

    pub fn percent(self) -> u8 {
        self.0
    }
}

impl From<i32> for FanCommand {
    fn from(percent: i32) -> Self {
        Self::clamped(percent)
    }
}

impl From<FanCommand> for u8 {
    fn from(command: FanCommand) -> Self {
        command.0
    }
}

impl fmt::Display for FanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Thresholds of the piecewise-linear speed policy.
///
/// Fields are private so that every instance satisfies
/// `temp_min < temp_max` and `0 <= speed_min <= speed_max <= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawThresholds", into = "RawThresholds")]
pub struct ControlThresholds {
    temp_min: f64,
    temp_max: f64,
    speed_min: u8,
    speed_max: u8,
}

#[derive(Serialize, Deserialize)]
struct RawThresholds {
    temp_min: f64,
    temp_max: f64,
    speed_min: i32,
    speed_max: i32,
}

impl ControlThresholds {
    pub fn new(temp_min: f64, temp_max: f64, speed_min: i32, speed_max: i32) -> Result<Self> {
        if !temp_min.is_finite() || !temp_max.is_finite() {
            return Err(ThermoPiError::Config(format!(
                "Temperature thresholds must be finite (got {} and {})",
                temp_min, temp_max
            )));
        }
        if temp_min >= temp_max {
            return Err(ThermoPiError::Config(format!(
                "temp_min ({:.1}°C) must be below temp_max ({:.1}°C)",
                temp_min, temp_max
            )));
        }
        if !(0..=100).contains(&speed_min) || !(0..=100).contains(&speed_max) || speed_min > speed_max {
            return Err(ThermoPiError::Config(format!(
                "Speeds must satisfy 0 <= speed_min <= speed_max <= 100 (got {} and {})",
                speed_min, speed_max
            )));
        }

        Ok(Self {
            temp_min,
            temp_max,
            speed_min: speed_min as u8,
            speed_max: speed_max as u8,
        })
    }

    pub fn temp_min(&self) -> f64 {
        self.temp_min
    }

    pub fn temp_max(&self) -> f64 {
        self.temp_max
    }

    pub fn speed_min(&self) -> u8 {
        self.speed_min
    }

    pub fn speed_max(&self) -> u8 {
        self.speed_max
    }
}

impl Default for ControlThresholds {
    fn default() -> Self {
        Self {
            temp_min: 50.0,
            temp_max: 65.0,
            speed_min: 20,
            speed_max: 80,
        }
    }
}

impl TryFrom<RawThresholds> for ControlThresholds {
    type Error = ThermoPiError;

    fn try_from(raw: RawThresholds) -> Result<Self> {
        Self::new(raw.temp_min, raw.temp_max, raw.speed_min, raw.speed_max)
    }
}

impl From<ControlThresholds> for RawThresholds {
    fn from(t: ControlThresholds) -> Self {
        Self {
            temp_min: t.temp_min,
            temp_max: t.temp_max,
            speed_min: t.speed_min as i32,
            speed_max: t.speed_max as i32,
        }
    }
}

/// Calculate the duty for a temperature.
///
/// Below `temp_min` the fan is off; strictly above `temp_max` it runs at
/// 100%. In between (bounds included) the duty is interpolated from
/// `speed_min` to `speed_max` and floored, so exactly `temp_max` yields
/// `speed_max`, not 100. A NaN reading is treated as overheating.
pub fn evaluate(temperature: f64, thresholds: &ControlThresholds) -> FanCommand {
    if temperature.is_nan() {
        return FanCommand::FULL;
    }
    if temperature < thresholds.temp_min {
        return FanCommand::OFF;
    }
    if temperature > thresholds.temp_max {
        return FanCommand::FULL;
    }

    let temp_range = thresholds.temp_max - thresholds.temp_min;
    let speed_range = (thresholds.speed_max - thresholds.speed_min) as f64;
    let ratio = (temperature - thresholds.temp_min) / temp_range;
    let speed = thresholds.speed_min as f64 + speed_range * ratio;

    FanCommand::clamped(speed.floor() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> ControlThresholds {
        ControlThresholds::new(50.0, 65.0, 20, 80).unwrap()
    }

    #[test]
    fn test_below_min_is_off() {
        let t = thresholds();
        for temp in [-40.0, 0.0, 30.0, 49.99] {
            assert_eq!(evaluate(temp, &t), FanCommand::OFF, "at {}", temp);
        }
    }

    #[test]
    fn test_above_max_is_full() {
        let t = thresholds();
        for temp in [65.01, 70.0, 120.0] {
            assert_eq!(evaluate(temp, &t), FanCommand::FULL, "at {}", temp);
        }
    }

    #[test]
    fn test_boundaries() {
        let t = thresholds();
        assert_eq!(evaluate(50.0, &t).percent(), 20);
        // Full throttle only once temp_max is exceeded
        assert_eq!(evaluate(65.0, &t).percent(), 80);
        assert_eq!(evaluate(65.01, &t).percent(), 100);
    }

    #[test]
    fn test_interpolation() {
        let t = thresholds();
        assert_eq!(evaluate(57.5, &t).percent(), 50);
        // 20 + 60 * (1 / 15) = 24 exactly
        assert_eq!(evaluate(51.0, &t).percent(), 24);
        // 20 + 60 * (0.5 / 15) = 22, floored from 22.0
        assert_eq!(evaluate(50.5, &t).percent(), 22);
        // 20 + 60 * (0.3 / 15) = 21.2 -> 21
        assert_eq!(evaluate(50.3, &t).percent(), 21);
    }

    #[test]
    fn test_monotonic_within_band() {
        let t = thresholds();
        let mut previous = evaluate(50.0, &t);
        let mut temp = 50.0;
        while temp <= 65.0 {
            let duty = evaluate(temp, &t);
            assert!(duty >= previous, "duty dropped at {}", temp);
            assert!((20..=80).contains(&duty.percent()), "out of band at {}", temp);
            previous = duty;
            temp += 0.05;
        }
    }

    #[test]
    fn test_nan_runs_fan_at_full() {
        assert_eq!(evaluate(f64::NAN, &thresholds()), FanCommand::FULL);
    }

    #[test]
    fn test_command_clamps() {
        assert_eq!(FanCommand::clamped(-10), FanCommand::clamped(0));
        assert_eq!(FanCommand::clamped(110), FanCommand::clamped(100));
        assert_eq!(FanCommand::clamped(42).to_string(), "42%");
    }

    #[test]
    fn test_threshold_validation() {
        assert!(ControlThresholds::new(65.0, 50.0, 20, 80).is_err());
        assert!(ControlThresholds::new(50.0, 50.0, 20, 80).is_err());
        assert!(ControlThresholds::new(50.0, 65.0, 80, 20).is_err());
        assert!(ControlThresholds::new(50.0, 65.0, -1, 80).is_err());
        assert!(ControlThresholds::new(50.0, 65.0, 20, 101).is_err());
        assert!(ControlThresholds::new(f64::NAN, 65.0, 20, 80).is_err());
        assert!(ControlThresholds::new(50.0, 65.0, 0, 0).is_ok());
    }

    #[test]
    fn test_thresholds_deserialize_validated() {
        let ok: ControlThresholds = serde_json::from_str(
            r#"{"temp_min": 40.0, "temp_max": 70.0, "speed_min": 10, "speed_max": 90}"#,
        )
        .unwrap();
        assert_eq!(ok.speed_max(), 90);

        let bad = serde_json::from_str::<ControlThresholds>(
            r#"{"temp_min": 70.0, "temp_max": 40.0, "speed_min": 10, "speed_max": 90}"#,
        );
        assert!(bad.is_err());
    }
}
