//! Command line argument parsing for the fan controller

use crate::config::Config;
use crate::errors::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ThermoPi - temperature-driven PWM fan control for the Raspberry Pi
#[derive(Parser, Debug)]
#[command(name = "thermopi")]
#[command(about = "Temperature-driven PWM fan controller")]
#[command(version)]
pub struct Args {
    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to ~/.thermopi/config.json)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Fall back to a simulated PWM output if the real one cannot be claimed
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Fabricate temperatures instead of reading the thermal zone
    #[arg(long, global = true)]
    pub fake_sensor: bool,

    /// BCM GPIO pin driving the fan
    #[arg(long, global = true)]
    pub pin: Option<u8>,

    /// PWM frequency in Hz
    #[arg(long, global = true)]
    pub frequency: Option<u32>,

    /// Mirror diagnostic logs to this file
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Write per-tick samples to this file
    #[arg(long, value_name = "FILE", global = true, conflicts_with = "no_sample_log")]
    pub sample_log: Option<PathBuf>,

    /// Do not write the per-tick sample log
    #[arg(long, global = true)]
    pub no_sample_log: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Interactive terminal control (default)
    Run,
    /// Control the fan without a menu until interrupted
    Monitor,
    /// Print one temperature reading and the duty the curve would choose
    Status,
    /// Step the fan through a fixed duty sweep
    TestFan {
        /// Seconds to hold each plateau
        #[arg(long, default_value_t = 3)]
        hold: u64,
    },
    /// Print the effective configuration
    Config {
        /// Save it to the configuration file
        #[arg(long)]
        write: bool,
    },
}

impl Args {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }

    /// Apply command-line overrides on top of `config` and re-validate
    pub fn apply_to(&self, mut config: Config) -> Result<Config> {
        if let Some(pin) = self.pin {
            config.pwm.pin = pin;
        }
        if let Some(frequency) = self.frequency {
            config.pwm.frequency_hz = frequency;
        }
        if self.simulate {
            config.simulation.allow_actuator_fallback = true;
        }
        if self.fake_sensor {
            config.simulation.fake_sensor = true;
        }
        if let Some(path) = &self.sample_log {
            config.sample_log = Some(path.clone());
        }
        if self.no_sample_log {
            config.sample_log = None;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }
}
