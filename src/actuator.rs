//! PWM actuator: hardware lifecycle and duty-cycle output

use crate::curve::FanCommand;
use crate::errors::HardwareError;
use log::{debug, info, warn};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Default sysfs PWM chip (Raspberry Pi with `dtoverlay=pwm-2chan`)
pub const DEFAULT_PWM_CHIP: &str = "/sys/class/pwm/pwmchip0";

/// Whether commands reach a physical output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Hardware,
    Simulated,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Hardware => write!(f, "hardware"),
            BackendKind::Simulated => write!(f, "SIMULATED"),
        }
    }
}

/// Low-level PWM output.
///
/// `claim` must first drop any stale claim on the same output so that
/// re-initialization never conflicts with a previous owner.
pub trait PwmBackend: Send {
    fn claim(&mut self, pin: u8, frequency_hz: u32) -> Result<(), HardwareError>;
    fn write_duty(&mut self, percent: u8) -> Result<(), HardwareError>;
    fn set_enabled(&mut self, enabled: bool) -> Result<(), HardwareError>;
    fn release(&mut self) -> Result<(), HardwareError>;
    fn kind(&self) -> BackendKind;
}

/// Proof that the driver holds a started PWM output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub pin: u8,
    pub frequency_hz: u32,
    pub kind: BackendKind,
}

/// Owns a PWM backend and enforces the Uninitialized -> Ready -> Uninitialized lifecycle
pub struct ActuatorDriver {
    backend: Box<dyn PwmBackend>,
    settle: Duration,
    ready: Option<Ready>,
    duty: FanCommand,
}

impl ActuatorDriver {
    /// Time given to the output to settle after start and before stop
    pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

    pub fn new(backend: Box<dyn PwmBackend>) -> Self {
        Self::with_settle(backend, Self::DEFAULT_SETTLE)
    }

    pub fn with_settle(backend: Box<dyn PwmBackend>, settle: Duration) -> Self {
        Self {
            backend,
            settle,
            ready: None,
            duty: FanCommand::OFF,
        }
    }

    /// Claim `pin` and start PWM at 0% duty, releasing any previous claim first
    pub fn initialize(&mut self, pin: u8, frequency_hz: u32) -> Result<Ready, HardwareError> {
        if self.ready.is_some() {
            debug!("Re-initializing PWM output; releasing previous claim");
            self.release_claim();
        }

        info!("Initializing PWM output on GPIO {} at {} Hz", pin, frequency_hz);
        self.backend.claim(pin, frequency_hz)?;

        let started = self
            .backend
            .write_duty(0)
            .and_then(|()| self.backend.set_enabled(true));
        if let Err(e) = started {
            if let Err(release_err) = self.backend.release() {
                warn!("Failed to release PWM output after start failure: {}", release_err);
            }
            return Err(e);
        }

        thread::sleep(self.settle);

        let ready = Ready {
            pin,
            frequency_hz,
            kind: self.backend.kind(),
        };
        self.ready = Some(ready);
        self.duty = FanCommand::OFF;

        match ready.kind {
            BackendKind::Hardware => info!("PWM output ready on GPIO {} (duty 0%)", pin),
            BackendKind::Simulated => warn!(
                "PWM output on GPIO {} is SIMULATED; no fan is physically driven",
                pin
            ),
        }
        Ok(ready)
    }

    /// Apply a duty cycle, clamped to 0..=100
    pub fn set_duty(&mut self, duty: impl Into<FanCommand>) -> Result<FanCommand, HardwareError> {
        let duty = duty.into();
        if self.ready.is_none() {
            return Err(HardwareError::NotInitialized);
        }

        self.backend.write_duty(duty.percent())?;
        self.duty = duty;
        debug!("Fan duty set to {}", duty);
        Ok(duty)
    }

    /// Drive the output to 0%, stop it and release the pin. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.ready.is_none() {
            return;
        }
        self.release_claim();
        info!("PWM output stopped and released");
    }

    fn release_claim(&mut self) {
        if let Err(e) = self.backend.write_duty(0) {
            warn!("Failed to drive fan to 0% during shutdown: {}", e);
        }
        thread::sleep(self.settle);
        if let Err(e) = self.backend.set_enabled(false) {
            warn!("Failed to stop PWM generation: {}", e);
        }
        if let Err(e) = self.backend.release() {
            warn!("Failed to release PWM output: {}", e);
        }
        self.ready = None;
        self.duty = FanCommand::OFF;
    }

    pub fn ready(&self) -> Option<Ready> {
        self.ready
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_some()
    }

    /// Last duty successfully written
    pub fn duty(&self) -> FanCommand {
        self.duty
    }
}

impl Drop for ActuatorDriver {
    fn drop(&mut self) {
        if self.ready.is_some() {
            warn!("PWM output dropped while active; forcing fail-safe shutdown");
            self.shutdown();
        }
    }
}

/// Map a BCM GPIO number to its hardware PWM channel
pub fn channel_for_pin(pin: u8) -> Result<u32, HardwareError> {
    match pin {
        12 | 18 => Ok(0),
        13 | 19 => Ok(1),
        _ => Err(HardwareError::UnsupportedPin(pin)),
    }
}

struct SysfsClaim {
    channel: u32,
    channel_dir: PathBuf,
    period_ns: u64,
}

/// Linux sysfs PWM interface (`/sys/class/pwm/pwmchipN`)
pub struct SysfsPwm {
    chip: PathBuf,
    channel_override: Option<u32>,
    claim: Option<SysfsClaim>,
}

impl SysfsPwm {
    const EXPORT_POLL: Duration = Duration::from_millis(10);
    const EXPORT_ATTEMPTS: u32 = 50;

    pub fn new(chip: impl Into<PathBuf>, channel_override: Option<u32>) -> Self {
        Self {
            chip: chip.into(),
            channel_override,
            claim: None,
        }
    }

    fn write(path: &Path, value: impl fmt::Display) -> Result<(), HardwareError> {
        fs::write(path, value.to_string()).map_err(|source| HardwareError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn claimed(&self) -> Result<&SysfsClaim, HardwareError> {
        self.claim.as_ref().ok_or(HardwareError::NotInitialized)
    }

    /// Export the channel, waiting for udev to publish its directory
    fn export(&self, pin: u8, channel: u32, channel_dir: &Path) -> Result<(), HardwareError> {
        if channel_dir.is_dir() {
            debug!("PWM channel {} already exported; dropping stale claim", channel);
            let _ = fs::write(channel_dir.join("enable"), "0");
            let _ = fs::write(self.chip.join("unexport"), channel.to_string());
        }

        fs::write(self.chip.join("export"), channel.to_string()).map_err(|e| HardwareError::Claim {
            pin,
            reason: format!("export of channel {} failed: {}", channel, e),
        })?;

        for _ in 0..Self::EXPORT_ATTEMPTS {
            if channel_dir.is_dir() {
                return Ok(());
            }
            thread::sleep(Self::EXPORT_POLL);
        }

        Err(HardwareError::Claim {
            pin,
            reason: format!("{} did not appear after export", channel_dir.display()),
        })
    }
}

impl PwmBackend for SysfsPwm {
    fn claim(&mut self, pin: u8, frequency_hz: u32) -> Result<(), HardwareError> {
        if frequency_hz == 0 {
            return Err(HardwareError::Claim {
                pin,
                reason: "PWM frequency must be above 0 Hz".to_string(),
            });
        }
        if !self.chip.is_dir() {
            return Err(HardwareError::Claim {
                pin,
                reason: format!(
                    "no PWM chip at {} (is the pwm overlay enabled?)",
                    self.chip.display()
                ),
            });
        }

        let channel = match self.channel_override {
            Some(channel) => channel,
            None => channel_for_pin(pin)?,
        };
        let channel_dir = self.chip.join(format!("pwm{}", channel));
        self.export(pin, channel, &channel_dir)?;

        let period_ns = 1_000_000_000 / u64::from(frequency_hz);
        // duty must never exceed period, so zero it before changing the period
        let configured = Self::write(&channel_dir.join("duty_cycle"), 0)
            .and_then(|()| Self::write(&channel_dir.join("period"), period_ns));
        if let Err(e) = configured {
            if let Err(unexport_err) = fs::write(self.chip.join("unexport"), channel.to_string()) {
                warn!("Failed to unexport PWM channel {}: {}", channel, unexport_err);
            }
            return Err(e);
        }

        debug!(
            "Claimed {} (GPIO {}, period {} ns)",
            channel_dir.display(),
            pin,
            period_ns
        );
        self.claim = Some(SysfsClaim {
            channel,
            channel_dir,
            period_ns,
        });
        Ok(())
    }

    fn write_duty(&mut self, percent: u8) -> Result<(), HardwareError> {
        let claim = self.claimed()?;
        let duty_ns = claim.period_ns * u64::from(percent.min(100)) / 100;
        Self::write(&claim.channel_dir.join("duty_cycle"), duty_ns)
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), HardwareError> {
        let claim = self.claimed()?;
        Self::write(&claim.channel_dir.join("enable"), u8::from(enabled))
    }

    fn release(&mut self) -> Result<(), HardwareError> {
        match self.claim.take() {
            Some(claim) => Self::write(&self.chip.join("unexport"), claim.channel),
            None => Ok(()),
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Hardware
    }
}

/// Observable state of a simulated output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatedOutput {
    pub claimed_pin: Option<u8>,
    pub frequency_hz: u32,
    pub enabled: bool,
    pub duty: u8,
    pub writes: Vec<u8>,
    pub claims: u32,
}

/// PWM backend that accepts every command and drives nothing
#[derive(Default)]
pub struct SimulatedPwm {
    output: Arc<Mutex<SimulatedOutput>>,
}

impl SimulatedPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of what the simulated output has been told
    pub fn probe(&self) -> Arc<Mutex<SimulatedOutput>> {
        Arc::clone(&self.output)
    }

    fn with_output(&self, f: impl FnOnce(&mut SimulatedOutput)) {
        // A poisoned probe only means a test panicked while holding it
        let mut output = match self.output.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut output);
    }
}

impl PwmBackend for SimulatedPwm {
    fn claim(&mut self, pin: u8, frequency_hz: u32) -> Result<(), HardwareError> {
        self.with_output(|out| {
            out.claimed_pin = Some(pin);
            out.frequency_hz = frequency_hz;
            out.enabled = false;
            out.duty = 0;
            out.claims += 1;
        });
        Ok(())
    }

    fn write_duty(&mut self, percent: u8) -> Result<(), HardwareError> {
        let mut claimed = true;
        self.with_output(|out| {
            if out.claimed_pin.is_none() {
                claimed = false;
                return;
            }
            out.duty = percent;
            out.writes.push(percent);
        });
        if !claimed {
            return Err(HardwareError::NotInitialized);
        }
        debug!("Simulated PWM duty -> {}%", percent);
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), HardwareError> {
        self.with_output(|out| out.enabled = enabled);
        Ok(())
    }

    fn release(&mut self) -> Result<(), HardwareError> {
        self.with_output(|out| {
            out.claimed_pin = None;
            out.enabled = false;
        });
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Simulated
    }
}
