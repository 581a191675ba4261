//! Sample log: appends one line per control-loop event to a text file

use crate::control_loop::{LoopEvent, LoopOutcome};
use chrono::{DateTime, Local};
use log::{info, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

pub struct SampleRecorder {
    path: PathBuf,
    file: File,
}

impl SampleRecorder {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("Recording samples to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, event: &LoopEvent) -> io::Result<()> {
        let line = format_event(event, Local::now());
        writeln!(self.file, "{}", line)
    }
}

/// Render an event as a log line
pub fn format_event(event: &LoopEvent, at: DateTime<Local>) -> String {
    let timestamp = at.format("%Y-%m-%d %H:%M:%S");
    match event {
        LoopEvent::Sample(sample) => format!(
            "{} - Temp: {:.1}°C, Fan: {}, Mode: {}",
            timestamp, sample.reading.celsius, sample.command, sample.mode
        ),
        LoopEvent::TickFailed { message, consecutive } => format!(
            "{} - ERROR: {} (consecutive failures: {})",
            timestamp, message, consecutive
        ),
        LoopEvent::ModeChanged(mode) => format!("{} - Mode changed to {}", timestamp, mode),
        LoopEvent::Stopped(LoopOutcome::Exited) => format!("{} - Controller stopped", timestamp),
        LoopEvent::Stopped(LoopOutcome::Halted {
            consecutive_failures,
        }) => format!(
            "{} - Controller HALTED after {} consecutive failures; fan turned off",
            timestamp, consecutive_failures
        ),
        LoopEvent::Stopped(LoopOutcome::Aborted) => format!(
            "{} - Controller ABORTED on an internal error; fan turned off",
            timestamp
        ),
    }
}

/// Record events until the loop stops. Write failures are logged and never reach the loop.
pub fn spawn(mut recorder: SampleRecorder, mut events: broadcast::Receiver<LoopEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = recorder.record(&event) {
                        warn!("Failed to write {}: {}", recorder.path().display(), e);
                    }
                    if matches!(event, LoopEvent::Stopped(_)) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Sample log fell behind; {} event(s) not recorded", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
