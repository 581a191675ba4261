//! Periodic control loop and the command/observer boundary around it
//!
//! The loop task exclusively owns the [`FanController`]. Front-ends talk to it
//! through a cloneable [`ControllerHandle`]: commands travel over an mpsc
//! queue and are applied between ticks, so a manual override can never
//! interleave with an automatic tick. Results are published on a broadcast
//! channel (slow observers lag and skip events instead of stalling the loop)
//! and the most recent sample is kept in a watch channel.
//!
//! Sensor reads and PWM writes block, so every call into the controller runs
//! on tokio's blocking pool while the loop task awaits it.

use crate::config::ControlConfig;
use crate::controller::{ControlMode, ControllerState, FanController, Sample};
use crate::curve::{ControlThresholds, FanCommand};
use crate::errors::ControlError;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task;
use tokio::time::{self, MissedTickBehavior};

const COMMAND_QUEUE: usize = 16;
const EVENT_BUFFER: usize = 64;
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Commands accepted by the control loop
#[derive(Debug)]
pub enum Command {
    SetMode {
        mode: ControlMode,
        reply: oneshot::Sender<ControlMode>,
    },
    SetManualSpeed {
        percent: i32,
        reply: oneshot::Sender<Result<FanCommand, ControlError>>,
    },
    RequestStatus {
        reply: oneshot::Sender<StatusReport>,
    },
    Exit,
}

/// Answer to [`Command::RequestStatus`]
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub state: ControllerState,
    pub last_sample: Option<Sample>,
    pub thresholds: ControlThresholds,
    pub sensor: String,
    pub sensor_simulated: bool,
    pub consecutive_failures: u32,
}

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Stop requested, or every handle was dropped
    Exited,
    /// Too many consecutive tick failures
    Halted { consecutive_failures: u32 },
    /// The controller panicked; dropping it shut the output down
    Aborted,
}

/// Published to observers
#[derive(Debug, Clone)]
pub enum LoopEvent {
    Sample(Sample),
    TickFailed { message: String, consecutive: u32 },
    ModeChanged(ControlMode),
    Stopped(LoopOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub interval: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_consecutive_failures: 3,
        }
    }
}

impl From<&ControlConfig> for LoopSettings {
    fn from(config: &ControlConfig) -> Self {
        Self {
            interval: config.interval(),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
        }
    }
}

pub struct ControlLoop {
    /// `None` only after the controller was lost to a panic
    controller: Option<FanController>,
    settings: LoopSettings,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<LoopEvent>,
    latest: watch::Sender<Option<Sample>>,
    last_sample: Option<Sample>,
    consecutive_failures: u32,
}

impl ControlLoop {
    pub fn new(controller: FanController, mut settings: LoopSettings) -> (Self, ControllerHandle) {
        if settings.interval < MIN_INTERVAL {
            warn!(
                "Tick interval {:?} is too short; using {:?}",
                settings.interval, MIN_INTERVAL
            );
            settings.interval = MIN_INTERVAL;
        }
        settings.max_consecutive_failures = settings.max_consecutive_failures.max(1);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (latest_tx, latest_rx) = watch::channel(None);

        let control_loop = Self {
            controller: Some(controller),
            settings,
            commands: command_rx,
            events: event_tx.clone(),
            latest: latest_tx,
            last_sample: None,
            consecutive_failures: 0,
        };
        let handle = ControllerHandle {
            commands: command_tx,
            events: event_tx,
            latest: latest_rx,
        };
        (control_loop, handle)
    }

    /// Tick until stopped or halted, then shut the controller down.
    ///
    /// Pending commands are always served before the next tick, so a stop
    /// request is seen before any further hardware write.
    pub async fn run(mut self) -> LoopOutcome {
        info!(
            "Control loop started (interval {:?}, halt after {} consecutive failures)",
            self.settings.interval, self.settings.max_consecutive_failures
        );

        let mut ticker = time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Exit) => {
                        info!("Stop requested");
                        break LoopOutcome::Exited;
                    }
                    None => {
                        info!("All controller handles dropped; stopping");
                        break LoopOutcome::Exited;
                    }
                    Some(command) => {
                        if let Some(outcome) = self.handle(command).await {
                            break outcome;
                        }
                    }
                },
                _ = ticker.tick() => {
                    if let Some(outcome) = self.on_tick().await {
                        break outcome;
                    }
                }
            }
        };

        // After an abort there is nothing left to shut down; the driver's drop already did it
        let _ = self.with_controller(FanController::shutdown).await;
        let _ = self.events.send(LoopEvent::Stopped(outcome));
        info!("Control loop finished: {:?}", outcome);
        outcome
    }

    /// Run `f` on the blocking pool. `None` means the controller is gone.
    async fn with_controller<T, F>(&mut self, f: F) -> Option<T>
    where
        F: FnOnce(&mut FanController) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut controller = self.controller.take()?;
        let joined = task::spawn_blocking(move || {
            let out = f(&mut controller);
            (controller, out)
        })
        .await;

        match joined {
            Ok((controller, out)) => {
                self.controller = Some(controller);
                Some(out)
            }
            Err(e) => {
                error!("Controller task failed ({}); PWM output shut down on drop", e);
                None
            }
        }
    }

    async fn on_tick(&mut self) -> Option<LoopOutcome> {
        let Some(result) = self.with_controller(FanController::tick).await else {
            return Some(LoopOutcome::Aborted);
        };
        match result {
            Ok(sample) => {
                if self.consecutive_failures > 0 {
                    info!("Recovered after {} failed tick(s)", self.consecutive_failures);
                }
                self.consecutive_failures = 0;
                self.last_sample = Some(sample);
                self.latest.send_replace(Some(sample));
                let _ = self.events.send(LoopEvent::Sample(sample));
                None
            }
            Err(e) => {
                self.consecutive_failures += 1;
                let limit = self.settings.max_consecutive_failures;
                warn!(
                    "Control tick failed ({}/{}): {}",
                    self.consecutive_failures, limit, e
                );
                let _ = self.events.send(LoopEvent::TickFailed {
                    message: e.to_string(),
                    consecutive: self.consecutive_failures,
                });

                if self.consecutive_failures >= limit {
                    error!(
                        "{} consecutive control failures; halting and turning the fan off",
                        self.consecutive_failures
                    );
                    return Some(LoopOutcome::Halted {
                        consecutive_failures: self.consecutive_failures,
                    });
                }
                None
            }
        }
    }

    async fn handle(&mut self, command: Command) -> Option<LoopOutcome> {
        match command {
            Command::SetMode { mode, reply } => {
                if let Some(controller) = self.controller.as_mut() {
                    let changed = controller.mode() != mode;
                    controller.set_mode(mode);
                    if changed {
                        let _ = self.events.send(LoopEvent::ModeChanged(mode));
                    }
                    let _ = reply.send(mode);
                }
            }
            Command::SetManualSpeed { percent, reply } => {
                let Some(result) = self
                    .with_controller(move |controller| controller.set_manual_speed(percent))
                    .await
                else {
                    return Some(LoopOutcome::Aborted);
                };
                if let Err(e) = &result {
                    warn!("Manual speed {}% not applied: {}", percent, e);
                }
                let _ = reply.send(result);
            }
            Command::RequestStatus { reply } => {
                if let Some(report) = self.status() {
                    let _ = reply.send(report);
                }
            }
            Command::Exit => debug!("Exit handled by the run loop"),
        }
        None
    }

    fn status(&self) -> Option<StatusReport> {
        let controller = self.controller.as_ref()?;
        Some(StatusReport {
            state: controller.state(),
            last_sample: self.last_sample,
            thresholds: *controller.thresholds(),
            sensor: controller.sensor_description(),
            sensor_simulated: controller.sensor_is_simulated(),
            consecutive_failures: self.consecutive_failures,
        })
    }
}

/// Thread-safe entry point into a running [`ControlLoop`]
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<LoopEvent>,
    latest: watch::Receiver<Option<Sample>>,
}

impl ControllerHandle {
    pub async fn send(&self, command: Command) -> Result<(), ControlError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ControlError::LoopStopped)
    }

    pub async fn set_mode(&self, mode: ControlMode) -> Result<ControlMode, ControlError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::SetMode { mode, reply }).await?;
        response.await.map_err(|_| ControlError::LoopStopped)
    }

    pub async fn set_manual_speed(&self, percent: i32) -> Result<FanCommand, ControlError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::SetManualSpeed { percent, reply }).await?;
        response.await.map_err(|_| ControlError::LoopStopped)?
    }

    pub async fn status(&self) -> Result<StatusReport, ControlError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::RequestStatus { reply }).await?;
        response.await.map_err(|_| ControlError::LoopStopped)
    }

    /// Ask the loop to stop. Stopping an already stopped loop is not an error.
    pub async fn exit(&self) {
        if self.send(Command::Exit).await.is_err() {
            debug!("Exit requested but the control loop already stopped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.events.subscribe()
    }

    /// Most recent successful sample, if any
    pub fn latest_sample(&self) -> Option<Sample> {
        *self.latest.borrow()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
