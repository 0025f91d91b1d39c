//! Commandline argument parsers using clap for the badge simulator, the
//! receiver, and the processor

use crate::{
    config::{AdcResolution, BadgeConfig},
    processor::DEFAULT_WINDOW_SECS,
};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
/// Runs the badge firmware cycle against simulated hardware and prints every
/// record it notifies, one per line
pub struct BadgeArgs {
    /// RON config file; flags below override what it says
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Name to advertise as
    #[arg(short = 'n', long = "name")]
    pub name: Option<String>,

    /// Milliseconds between two records
    #[arg(short = 'i', long = "interval")]
    pub interval_ms: Option<u64>,

    /// Fit the skin-conductance sensor, adding a fourth field to records
    #[arg(short = 'g', long = "gsr")]
    pub gsr: bool,

    /// How to interpret the conductance ADC's raw readings
    #[arg(long = "adc", value_enum)]
    pub adc: Option<AdcArg>,

    /// Play this WAV file into the microphone instead of noise
    #[arg(short = 'w', long = "wav")]
    pub wav: Option<PathBuf>,

    /// Amplitude of the simulated microphone noise
    #[arg(long = "noise", default_value_t = 2000)]
    pub noise: i16,

    /// Signal strength the simulated receiver starts at, in dBm
    #[arg(long = "rssi", default_value_t = -60, allow_hyphen_values = true)]
    pub rssi: i16,

    /// Seconds the simulated receiver stays connected before leaving; it
    /// reconnects after the same time. Stays forever when not given
    #[arg(short = 's', long = "session")]
    pub session_secs: Option<u64>,

    /// Stop after this many seconds; runs until killed when not given
    #[arg(short = 'd', long = "duration")]
    pub duration_secs: Option<u64>,

    /// Seed for the simulated sensors
    #[arg(long = "seed", default_value_t = 0)]
    pub seed: u64,
}

/// [AdcResolution], as a command line value.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AdcArg {
    /// 10-bit converter
    Bits10,
    /// 12-bit converter
    Bits12,
    /// Guess from each reading
    Auto,
}

impl From<AdcArg> for AdcResolution {
    fn from(value: AdcArg) -> Self {
        match value {
            AdcArg::Bits10 => AdcResolution::Bits10,
            AdcArg::Bits12 => AdcResolution::Bits12,
            AdcArg::Auto => AdcResolution::Auto,
        }
    }
}

impl BadgeArgs {
    /// Lays the flags over `config`.
    pub fn apply(&self, mut config: BadgeConfig) -> BadgeConfig {
        if let Some(name) = &self.name {
            config.device_name = name.clone();
        }
        if let Some(ms) = self.interval_ms {
            config.cycle_interval_ms = ms;
        }
        if self.gsr {
            config.conductance_enabled = true;
        }
        if let Some(adc) = self.adc {
            config.adc_resolution = adc.into();
        }
        config
    }
}

/// A badge to listen to, and the serial device its adapter is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgePort {
    /// Name its records are filed under
    pub badge: String,
    /// Serial device path
    pub path: PathBuf,
}

/// Parses `NAME=PATH`.
fn parse_badge_port(s: &str) -> Result<BadgePort, String> {
    match s.split_once('=') {
        Some((badge, path)) if !badge.is_empty() && !path.is_empty() => Ok(BadgePort {
            badge: badge.to_owned(),
            path: PathBuf::from(path),
        }),
        _ => Err(format!("expected NAME=PATH, got {:?}", s)),
    }
}

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
/// Collects records from one or more badges into a single CSV file
pub struct ReceiverArgs {
    /// A badge and the serial device its adapter is on, as NAME=PATH; repeat
    /// for every badge. Asks for one device when none is given
    #[arg(short = 'p', long = "port", value_name = "NAME=PATH", value_parser = parse_badge_port, conflicts_with = "stdin")]
    pub ports: Vec<BadgePort>,

    /// Read records from stdin instead of a serial device
    #[arg(long = "stdin")]
    pub stdin: bool,

    /// Baud rate of the serial devices
    #[arg(short = 'b', long = "baud", default_value_t = 115200)]
    pub baud: u32,

    /// Name to file records under when reading stdin or a device picked
    /// from the list
    #[arg(short = 'n', long = "badge", default_value = "Badge")]
    pub badge: String,

    /// Directory the session CSV file goes in
    #[arg(short = 'o', long = "out", default_value = "badge_data")]
    pub out_dir: PathBuf,

    /// Show a live chart of the incoming records
    #[arg(short = 'l', long = "live")]
    pub live: bool,
}

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
/// Summarizes a session CSV file into fixed time windows per badge
pub struct ProcessorArgs {
    /// Session file to process; the newest one in the data directory when
    /// not given
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Where to look for session files
    #[arg(short = 'd', long = "data-dir", default_value = "badge_data")]
    pub data_dir: PathBuf,

    /// RON file with activity labels for time periods
    #[arg(short = 'l', long = "labels")]
    pub labels: Option<PathBuf>,

    /// Window length in seconds
    #[arg(short = 'w', long = "window", default_value_t = DEFAULT_WINDOW_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub window_secs: u64,

    /// Directory the session output folder goes in
    #[arg(short = 'o', long = "out", default_value = "processed_data")]
    pub out_dir: PathBuf,
}
