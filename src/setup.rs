//! Building the controller's collaborators from configuration

use crate::actuator::{ActuatorDriver, BackendKind, SimulatedPwm, SysfsPwm};
use crate::config::Config;
use crate::controller::FanController;
use crate::errors::Result;
use crate::sensor::{SimulatedSensor, TemperatureSource, ThermalZone};
use log::{error, warn};
use std::time::Duration;

pub fn build_sensor(config: &Config) -> Box<dyn TemperatureSource> {
    if config.simulation.fake_sensor {
        return Box::new(SimulatedSensor::new(config.thresholds.temp_min()));
    }
    Box::new(ThermalZone::new(
        config.sensor.path.clone(),
        Duration::from_millis(config.sensor.read_timeout_ms),
    ))
}

/// Claim the configured PWM output.
///
/// Failing to claim real hardware is fatal unless simulation fallback was
/// requested, in which case a simulated output is returned and announced.
pub fn open_actuator(config: &Config) -> Result<ActuatorDriver> {
    let settle = Duration::from_millis(config.pwm.settle_ms);
    let backend = SysfsPwm::new(config.pwm.chip.clone(), config.pwm.channel);
    let mut driver = ActuatorDriver::with_settle(Box::new(backend), settle);

    match driver.initialize(config.pwm.pin, config.pwm.frequency_hz) {
        Ok(_) => Ok(driver),
        Err(e) if config.simulation.allow_actuator_fallback => {
            warn!("Cannot drive PWM hardware: {}", e);
            warn!("Falling back to SIMULATED output as requested; the fan will not be driven");
            let mut simulated = ActuatorDriver::with_settle(Box::new(SimulatedPwm::new()), settle);
            simulated.initialize(config.pwm.pin, config.pwm.frequency_hz)?;
            Ok(simulated)
        }
        Err(e) => {
            error!("Cannot drive PWM hardware: {}", e);
            error!("Try running as root, enabling the pwm overlay, or pass --simulate");
            Err(e.into())
        }
    }
}

pub fn build_controller(config: &Config) -> Result<FanController> {
    let actuator = open_actuator(config)?;
    let sensor = build_sensor(config);
    Ok(FanController::new(
        config.thresholds,
        sensor,
        actuator,
        config.control.initial_mode,
    )?)
}

/// True when commands will not reach a physical fan
pub fn is_simulated(controller: &FanController) -> bool {
    controller
        .state()
        .hardware
        .map_or(true, |ready| ready.kind == BackendKind::Simulated)
}
