//! Startup configuration for a badge. Nothing here is re-derived at runtime.
//!
//! The configuration is stored with [serde] and [ron]. Every field has a
//! default, so a file only needs to name what it changes:
//!
//! ```text
//! (device_name:"Badge06",conductance_enabled:true,adc_resolution:Bits12)
//! ```

use crate::error::BadgeError;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

/// GATT service the badge advertises its data characteristic under.
pub const DEFAULT_SERVICE_UUID: &str = "0000012f-0000-1000-8000-00805f9b34fb";

/// The single write/notify characteristic records are pushed through.
pub const DEFAULT_CHARACTERISTIC_UUID: &str = "0000345f-0000-1000-8000-00805f9b34fb";

/// How the conductance sensor's raw ADC reading should be interpreted.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum AdcResolution {
    /// Full scale is 1023
    Bits10,
    /// Full scale is 4095
    Bits12,
    /// Guess from the magnitude of each reading: anything above the 10-bit
    /// full scale is taken to be 12-bit. This only works if the ADC never
    /// reports a 12-bit value that happens to be small, prefer an explicit
    /// width when the board is known.
    Auto,
}

impl AdcResolution {
    /// The largest value a 10-bit ADC reports.
    pub const FULL_SCALE_10: u16 = 1023;
    /// The largest value a 12-bit ADC reports.
    pub const FULL_SCALE_12: u16 = 4095;

    /// The divisor used to rescale `raw` into 0..=255.
    pub fn full_scale(self, raw: u16) -> u16 {
        match self {
            AdcResolution::Bits10 => Self::FULL_SCALE_10,
            AdcResolution::Bits12 => Self::FULL_SCALE_12,
            AdcResolution::Auto if raw <= Self::FULL_SCALE_10 => Self::FULL_SCALE_10,
            AdcResolution::Auto => Self::FULL_SCALE_12,
        }
    }
}

/// Everything a badge needs to know before it starts sampling.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BadgeConfig {
    /// Name the badge advertises itself as
    pub device_name: String,
    /// Advertised service identifier
    pub service_uuid: String,
    /// Identifier of the notify characteristic
    pub characteristic_uuid: String,
    /// Microphone sample rate, in Hz
    pub sample_rate: u32,
    /// Microphone channel count
    pub channels: u16,
    /// Capacity of the sample buffer, in samples. The audio power is
    /// normalized by this, not by how many samples the last callback wrote.
    pub buffer_capacity: usize,
    /// Sleep between two cycles, in milliseconds
    pub cycle_interval_ms: u64,
    /// Whether the skin-conductance sensor is fitted. Adds a fourth field to
    /// every record.
    pub conductance_enabled: bool,
    /// How long the conductance sensor is powered before it is sampled, in
    /// milliseconds
    pub settle_delay_ms: u64,
    /// Resolution of the conductance sensor's ADC
    pub adc_resolution: AdcResolution,
}

impl Default for BadgeConfig {
    fn default() -> Self {
        Self {
            device_name: "Badge".to_owned(),
            service_uuid: DEFAULT_SERVICE_UUID.to_owned(),
            characteristic_uuid: DEFAULT_CHARACTERISTIC_UUID.to_owned(),
            sample_rate: 16_000,
            channels: 1,
            buffer_capacity: 256,
            cycle_interval_ms: 100,
            conductance_enabled: false,
            settle_delay_ms: 20,
            adc_resolution: AdcResolution::Bits10,
        }
    }
}

impl BadgeConfig {
    /// Reads a RON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BadgeError> {
        let text = fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Parses a config from RON text.
    pub fn from_ron(text: &str) -> Result<Self, BadgeError> {
        Ok(ron::de::from_str(text)?)
    }

    /// Writes this config as RON, so it can be edited and loaded back.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), BadgeError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, text)?;
        Ok(())
    }

    /// The per-cycle sleep.
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    /// The conductance sensor settle delay.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
