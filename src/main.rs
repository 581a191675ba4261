//! Main entry point for the fan controller

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::process::ExitCode;
use std::time::Duration;
use thermopi::{
    args::{Args, Commands},
    config::Config,
    control_loop::{ControlLoop, ControllerHandle, LoopEvent, LoopOutcome, LoopSettings},
    curve, fan_test, logging, recorder, sensor, setup, terminal,
};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    eprintln!(
        "thermopi v{} (git {} / {}) built {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("THERMOPI_GIT_HASH").unwrap_or("unknown"),
        option_env!("THERMOPI_GIT_DESC").unwrap_or("unknown"),
        option_env!("THERMOPI_BUILD_TIME").unwrap_or("unknown"),
    );
    let args = Args::parse();

    logging::setup(args.verbose, args.log_file.as_deref()).context("Failed to set up logging")?;

    let config_path = args.config_path();
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let config = args.apply_to(config).context("Invalid configuration")?;

    match args.command() {
        Commands::Config { write } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if write {
                config.save_to_file(&config_path)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => print_reading(&config),
        Commands::TestFan { hold } => run_fan_test(&config, hold).await,
        command @ (Commands::Run | Commands::Monitor) => run_controller(&config, command).await,
    }
}

/// Resolves on Ctrl+C, SIGTERM, SIGHUP or SIGQUIT.
///
/// Any of these would otherwise kill the process with the fan still at its last duty.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::SignalKind;
        tokio::select! {
            _ = ctrl_c => info!("Interrupted (Ctrl+C)"),
            _ = unix_signal(SignalKind::terminate(), "SIGTERM") => info!("Terminated (SIGTERM)"),
            _ = unix_signal(SignalKind::hangup(), "SIGHUP") => info!("Terminal hung up (SIGHUP)"),
            _ = unix_signal(SignalKind::quit(), "SIGQUIT") => info!("Quit (SIGQUIT)"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("Interrupted (Ctrl+C)");
    }
}

#[cfg(unix)]
async fn unix_signal(kind: tokio::signal::unix::SignalKind, name: &str) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!("Cannot listen for {}: {}", name, e);
            std::future::pending::<()>().await;
        }
    }
}

fn check_board(config: &Config) {
    match sensor::detect_board() {
        Ok(sensor::Board::RaspberryPi { .. }) => {}
        Ok(sensor::Board::Other) if config.simulation.allow_actuator_fallback => {
            info!("Not running on a Raspberry Pi; simulation fallback is enabled")
        }
        Ok(sensor::Board::Other) => warn!("This does not look like a Raspberry Pi"),
        Err(e) => warn!("Cannot read /proc/cpuinfo ({}); board check skipped", e),
    }
}

fn print_reading(config: &Config) -> Result<ExitCode> {
    let mut source = setup::build_sensor(config);
    let reading = source
        .read()
        .with_context(|| format!("Failed to read {}", source.describe()))?;
    let duty = curve::evaluate(reading.celsius, &config.thresholds);

    println!("CPU temperature: {:.1}°C ({})", reading.celsius, source.describe());
    println!("Automatic duty:  {}", duty);
    Ok(ExitCode::SUCCESS)
}

async fn run_fan_test(config: &Config, hold: u64) -> Result<ExitCode> {
    check_board(config);
    let mut driver = setup::open_actuator(config).context("Cannot start fan test")?;
    let plan = fan_test::SweepPlan::standard(Duration::from_secs(hold), Duration::from_secs(1));

    let outcome = fan_test::run_sweep(
        &mut driver,
        config.pwm.pin,
        config.pwm.frequency_hz,
        &plan,
        shutdown_signal(),
    )
    .await?;
    info!("Fan test finished: {:?}", outcome);
    Ok(ExitCode::SUCCESS)
}

async fn run_controller(config: &Config, command: Commands) -> Result<ExitCode> {
    check_board(config);
    let controller = setup::build_controller(config).context("Hardware initialization failed")?;
    if setup::is_simulated(&controller) {
        println!("NOTE: PWM output is simulated; the fan is not being driven");
    }

    let (control_loop, handle) = ControlLoop::new(controller, LoopSettings::from(&config.control));

    let recorder_task = match &config.sample_log {
        Some(path) => match recorder::SampleRecorder::open(path) {
            Ok(rec) => Some(recorder::spawn(rec, handle.subscribe())),
            Err(e) => {
                warn!("Sample log {} unavailable: {}", path.display(), e);
                None
            }
        },
        None => None,
    };

    let loop_task = tokio::spawn(control_loop.run());

    let front_end = match command {
        Commands::Monitor => {
            tokio::select! {
                _ = print_samples(&handle) => Ok(()),
                _ = shutdown_signal() => Ok(()),
            }
        }
        _ => {
            tokio::select! {
                result = terminal::run(handle.clone(), config.pwm.pin) => result,
                _ = shutdown_signal() => Ok(()),
            }
        }
    };

    handle.exit().await;
    let outcome = match loop_task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Control loop task failed: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    if let Some(task) = recorder_task {
        let _ = task.await;
    }

    exit_status(outcome, front_end)
}

/// A stopped loop is reported before any front-end error it caused
fn exit_status(outcome: LoopOutcome, front_end: thermopi::Result<()>) -> Result<ExitCode> {
    match outcome {
        LoopOutcome::Exited => {
            front_end.context("Terminal front-end failed")?;
            Ok(ExitCode::SUCCESS)
        }
        LoopOutcome::Halted { consecutive_failures } => {
            if let Err(e) = front_end {
                warn!("Front-end ended after the halt: {}", e);
            }
            eprintln!(
                "Stopped after {} consecutive control failures; fan turned off",
                consecutive_failures
            );
            Ok(ExitCode::FAILURE)
        }
        LoopOutcome::Aborted => {
            if let Err(e) = front_end {
                warn!("Front-end ended after the abort: {}", e);
            }
            eprintln!("Control loop aborted on an internal error; fan turned off");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Console output for headless mode; returns when the loop stops
async fn print_samples(handle: &ControllerHandle) {
    let mut events = handle.subscribe();
    loop {
        match events.recv().await {
            Ok(LoopEvent::Sample(sample)) => println!(
                "Temperature: {:.1}°C | Fan: {} | Mode: {}",
                sample.reading.celsius, sample.command, sample.mode
            ),
            Ok(LoopEvent::TickFailed { message, consecutive }) => {
                println!("Control failure #{}: {}", consecutive, message)
            }
            Ok(LoopEvent::ModeChanged(mode)) => println!("Mode: {}", mode),
            Ok(LoopEvent::Stopped(_)) | Err(RecvError::Closed) => return,
            Err(RecvError::Lagged(_)) => continue,
        }
    }
}
