//! Interactive terminal front-end

use crate::control_loop::{ControllerHandle, LoopEvent, LoopOutcome, StatusReport};
use crate::controller::ControlMode;
use crate::errors::{ControlError, Result};
use log::{debug, warn};
use std::io::{BufRead, Write};
use std::thread;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;

/// Menu entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    ToggleMode,
    SetSpeed,
    Status,
    Exit,
}

pub fn parse_choice(input: &str) -> Option<MenuChoice> {
    match input.trim() {
        "1" => Some(MenuChoice::ToggleMode),
        "2" => Some(MenuChoice::SetSpeed),
        "3" => Some(MenuChoice::Status),
        "4" | "q" | "quit" | "exit" => Some(MenuChoice::Exit),
        _ => None,
    }
}

/// Parse an operator speed; out-of-range integers are clamped by the controller
pub fn parse_speed(input: &str) -> Option<i32> {
    input.trim().trim_end_matches('%').trim().parse().ok()
}

pub fn format_status(report: &StatusReport, pin: u8) -> String {
    let temperature = match &report.last_sample {
        Some(sample) => format!("{:.1}°C", sample.reading.celsius),
        None => "--".to_string(),
    };
    let output = match report.state.hardware {
        Some(ready) => format!("GPIO {} ({} PWM, {} Hz)", ready.pin, ready.kind, ready.frequency_hz),
        None => format!("GPIO {} (released)", pin),
    };
    let sensor = if report.sensor_simulated {
        format!("{} (SIMULATED)", report.sensor)
    } else {
        report.sensor.clone()
    };
    let t = &report.thresholds;

    let mut text = String::new();
    text.push_str("\n--- ThermoPi status ---\n");
    text.push_str(&format!("CPU temperature: {}\n", temperature));
    text.push_str(&format!("Fan speed:       {}\n", report.state.current_speed));
    text.push_str(&format!("Control mode:    {}\n", report.state.mode));
    text.push_str(&format!("Output:          {}\n", output));
    text.push_str(&format!("Sensor:          {}\n", sensor));
    text.push_str(&format!(
        "Curve:           off < {:.1}°C, {}%..{}% up to {:.1}°C, 100% above\n",
        t.temp_min(),
        t.speed_min(),
        t.speed_max(),
        t.temp_max()
    ));
    if report.consecutive_failures > 0 {
        text.push_str(&format!("Failed ticks:    {} in a row\n", report.consecutive_failures));
    }
    text.push_str(&"=".repeat(40));
    text
}

fn show_menu() {
    println!("\nOptions:");
    println!("1. Toggle control mode (Manual/Automatic)");
    println!("2. Set fan speed (Manual mode only)");
    println!("3. Show current status");
    println!("4. Exit");
    prompt("Choice: ");
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

/// Read stdin on a plain thread so a pending read never holds up runtime shutdown
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Cannot read from stdin: {}", e);
    }
    rx
}

/// Wait until the loop reports that it stopped
async fn wait_for_stop(events: &mut broadcast::Receiver<LoopEvent>) -> Option<LoopOutcome> {
    loop {
        match events.recv().await {
            Ok(LoopEvent::Stopped(outcome)) => return Some(outcome),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Run the menu until the operator exits, stdin closes, or the loop stops
pub async fn run(handle: ControllerHandle, pin: u8) -> Result<()> {
    let mut lines = spawn_stdin_reader();
    let mut events = handle.subscribe();

    println!("ThermoPi - terminal mode");
    println!("{}", "=".repeat(50));
    println!("{}", format_status(&handle.status().await?, pin));

    loop {
        show_menu();
        let line = tokio::select! {
            line = lines.recv() => line,
            outcome = wait_for_stop(&mut events) => {
                println!();
                match outcome {
                    Some(LoopOutcome::Halted { consecutive_failures }) => println!(
                        "Controller halted after {} consecutive failures; fan turned off",
                        consecutive_failures
                    ),
                    Some(LoopOutcome::Aborted) => {
                        println!("Controller aborted on an internal error; fan turned off")
                    }
                    _ => println!("Controller stopped"),
                }
                return Ok(());
            }
        };

        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };

        match parse_choice(&line) {
            Some(MenuChoice::ToggleMode) => {
                let current = handle.status().await?.state.mode;
                let mode = handle.set_mode(current.toggled()).await?;
                println!("Switched to {} mode", mode);
            }
            Some(MenuChoice::SetSpeed) => set_speed(&handle, &mut lines).await?,
            Some(MenuChoice::Status) => println!("{}", format_status(&handle.status().await?, pin)),
            Some(MenuChoice::Exit) => {
                println!("Exiting...");
                break;
            }
            None => println!("Invalid choice, please try again."),
        }
    }

    handle.exit().await;
    Ok(())
}

async fn set_speed(handle: &ControllerHandle, lines: &mut mpsc::UnboundedReceiver<String>) -> Result<()> {
    let mode = handle.status().await?.state.mode;
    if mode != ControlMode::Manual {
        println!("Manual speed cannot be set in {} mode", mode);
        return Ok(());
    }

    prompt("Fan speed (0-100%): ");
    let Some(line) = lines.recv().await else {
        return Ok(());
    };
    let Some(percent) = parse_speed(&line) else {
        println!("Invalid input. Enter a whole number between 0 and 100.");
        return Ok(());
    };

    match handle.set_manual_speed(percent).await {
        Ok(applied) => println!("Fan speed set to {}", applied),
        // The mode may have changed between the check and the command
        Err(e @ ControlError::ManualSpeedRejected { .. }) => println!("{}", e),
        Err(ControlError::Hardware(e)) => println!("Fan speed not applied: {}", e),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
