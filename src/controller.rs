//! Fan controller: mode state machine on top of the sensor, curve and actuator

use crate::actuator::{ActuatorDriver, Ready};
use crate::curve::{self, ControlThresholds, FanCommand};
use crate::errors::{ControlError, HardwareError};
use crate::sensor::{TemperatureSource, ThermalReading};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Active speed policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Manual,
    Automatic,
}

impl ControlMode {
    pub fn toggled(self) -> Self {
        match self {
            ControlMode::Manual => ControlMode::Automatic,
            ControlMode::Automatic => ControlMode::Manual,
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMode::Manual => write!(f, "Manual"),
            ControlMode::Automatic => write!(f, "Automatic"),
        }
    }
}

/// What one control step observed and commanded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub reading: ThermalReading,
    pub command: FanCommand,
    pub mode: ControlMode,
}

/// Snapshot of the controller's mutable state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerState {
    /// Last duty successfully written to the actuator
    pub current_speed: FanCommand,
    /// Last duty requested, whether or not the write succeeded
    pub target_speed: FanCommand,
    pub mode: ControlMode,
    /// `None` once the hardware has been released
    pub hardware: Option<Ready>,
}

/// Owns the sensor and the actuator and decides what duty to apply
pub struct FanController {
    thresholds: ControlThresholds,
    sensor: Box<dyn TemperatureSource>,
    actuator: ActuatorDriver,
    state: ControllerState,
}

impl FanController {
    /// Wrap an initialized actuator; an uninitialized one is refused
    pub fn new(
        thresholds: ControlThresholds,
        sensor: Box<dyn TemperatureSource>,
        actuator: ActuatorDriver,
        mode: ControlMode,
    ) -> Result<Self, HardwareError> {
        let hardware = actuator.ready().ok_or(HardwareError::NotInitialized)?;
        let current_speed = actuator.duty();

        info!(
            "Fan controller started in {} mode using {} ({} output)",
            mode,
            sensor.describe(),
            hardware.kind
        );

        Ok(Self {
            thresholds,
            sensor,
            actuator,
            state: ControllerState {
                current_speed,
                target_speed: current_speed,
                mode,
                hardware: Some(hardware),
            },
        })
    }

    /// Switch policy. Takes effect on the next tick; Manual holds the current speed.
    pub fn set_mode(&mut self, mode: ControlMode) {
        if self.state.mode != mode {
            info!("Switched to {} mode (fan at {})", mode, self.state.current_speed);
        }
        self.state.mode = mode;
    }

    /// Apply an operator speed immediately. Only accepted in Manual mode.
    pub fn set_manual_speed(&mut self, percent: i32) -> Result<FanCommand, ControlError> {
        if self.state.mode != ControlMode::Manual {
            return Err(ControlError::ManualSpeedRejected {
                mode: self.state.mode,
            });
        }

        let command = self.apply(FanCommand::clamped(percent))?;
        info!("Manual fan speed set to {}", command);
        Ok(command)
    }

    /// One control step: read, decide, write.
    ///
    /// A failed read returns before any actuator write, leaving the
    /// previously commanded duty in place.
    pub fn tick(&mut self) -> Result<Sample, ControlError> {
        if self.state.hardware.is_none() {
            return Err(HardwareError::NotInitialized.into());
        }

        let reading = self.sensor.read()?;
        let desired = match self.state.mode {
            ControlMode::Automatic => curve::evaluate(reading.celsius, &self.thresholds),
            // Re-assert so an externally drifted duty is corrected
            ControlMode::Manual => self.state.current_speed,
        };
        let command = self.apply(desired)?;

        debug!(
            "Tick: {:.1}°C -> {} ({})",
            reading.celsius, command, self.state.mode
        );
        Ok(Sample {
            reading,
            command,
            mode: self.state.mode,
        })
    }

    fn apply(&mut self, command: FanCommand) -> Result<FanCommand, ControlError> {
        self.state.target_speed = command;
        let applied = self.actuator.set_duty(command)?;
        self.state.current_speed = applied;
        Ok(applied)
    }

    /// Turn the fan off and release the hardware. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.actuator.shutdown();
        self.state.current_speed = FanCommand::OFF;
        self.state.target_speed = FanCommand::OFF;
        self.state.hardware = None;
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn mode(&self) -> ControlMode {
        self.state.mode
    }

    pub fn current_speed(&self) -> FanCommand {
        self.state.current_speed
    }

    pub fn thresholds(&self) -> &ControlThresholds {
        &self.thresholds
    }

    pub fn sensor_description(&self) -> String {
        self.sensor.describe()
    }

    pub fn sensor_is_simulated(&self) -> bool {
        self.sensor.is_simulated()
    }
}
