//! ThermoPi
//!
//! Closed-loop fan control for the Raspberry Pi: sample the SoC temperature,
//! map it to a duty cycle and drive a PWM fan, with manual override and a
//! fail-safe shutdown that always leaves the fan off.

pub mod actuator;
pub mod args;
pub mod config;
pub mod control_loop;
pub mod controller;
pub mod curve;
pub mod errors;
pub mod fan_test;
pub mod logging;
pub mod recorder;
pub mod sensor;
pub mod setup;
pub mod terminal;

// Re-export commonly used types
pub use actuator::{ActuatorDriver, BackendKind, PwmBackend, Ready};
pub use control_loop::{Command, ControlLoop, ControllerHandle, LoopEvent, LoopOutcome, LoopSettings};
pub use controller::{ControlMode, ControllerState, FanController, Sample};
pub use curve::{ControlThresholds, FanCommand};
pub use errors::{ControlError, HardwareError, Result, SensorError, ThermoPiError};
pub use sensor::{TemperatureSource, ThermalReading};
