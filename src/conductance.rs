//! The optional skin-conductance (GSR) sensor.

use crate::{
    config::AdcResolution,
    peripherals::{ConductanceSensor, Delay},
};
use log::trace;
use std::time::Duration;

/// Keeps the sensor's rail energized for as long as it lives. Dropping it
/// always switches the rail back off, whatever path we leave by.
struct RailGuard<'a, S: ConductanceSensor> {
    sensor: &'a mut S,
}

impl<'a, S: ConductanceSensor> RailGuard<'a, S> {
    fn energize(sensor: &'a mut S) -> Self {
        sensor.set_rail(true);
        Self { sensor }
    }
}

impl<S: ConductanceSensor> Drop for RailGuard<'_, S> {
    fn drop(&mut self) {
        self.sensor.set_rail(false);
    }
}

/// Reads the conductance sensor once per call, powering it only for the
/// duration of the read.
#[derive(Debug)]
pub struct ConductanceReader<S: ConductanceSensor> {
    sensor: S,
    settle: Duration,
    resolution: AdcResolution,
}

impl<S: ConductanceSensor> ConductanceReader<S> {
    /// Instantiates a reader around `sensor`.
    pub fn new(sensor: S, settle: Duration, resolution: AdcResolution) -> Self {
        Self {
            sensor,
            settle,
            resolution,
        }
    }

    /// The wrapped sensor.
    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    /// The wrapped sensor, mutably. Used to bring it up at startup.
    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    /// Energizes the rail, waits for the sensor to settle, samples once,
    /// de-energizes the rail, and returns the reading scaled to 0..=255.
    pub fn read_level<D: Delay>(&mut self, delay: &mut D) -> u8 {
        let raw = {
            let rail = RailGuard::energize(&mut self.sensor);
            delay.delay(self.settle);
            rail.sensor.read_raw()
        };
        let level = rescale(raw, self.resolution);
        trace!("gsr raw={} level={}", raw, level);
        level
    }
}

/// Scales a raw ADC value into 0..=255 against the full scale `resolution`
/// implies for it.
pub fn rescale(raw: u16, resolution: AdcResolution) -> u8 {
    let full_scale = resolution.full_scale(raw) as u32;
    let scaled = raw as u32 * 255 / full_scale;
    // Only reachable when an ADC reports outside its nominal range.
    scaled.min(255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BadgeError;

    #[derive(Default)]
    struct RecordingSensor {
        raw: u16,
        rail: bool,
        events: Vec<&'static str>,
    }

    impl ConductanceSensor for RecordingSensor {
        fn begin(&mut self) -> Result<(), BadgeError> {
            Ok(())
        }
        fn set_rail(&mut self, on: bool) {
            self.rail = on;
            self.events.push(if on { "on" } else { "off" });
        }
        fn read_raw(&mut self) -> u16 {
            assert!(self.rail, "sampled with the rail off");
            self.events.push("read");
            self.raw
        }
    }

    #[derive(Default)]
    struct RecordingDelay(Vec<Duration>);

    impl Delay for RecordingDelay {
        fn delay(&mut self, duration: Duration) {
            self.0.push(duration);
        }
    }

    fn reader(raw: u16, resolution: AdcResolution) -> ConductanceReader<RecordingSensor> {
        ConductanceReader::new(
            RecordingSensor {
                raw,
                ..Default::default()
            },
            Duration::from_millis(20),
            resolution,
        )
    }

    #[test]
    fn rescale_endpoints() {
        assert_eq!(rescale(0, AdcResolution::Bits10), 0);
        assert_eq!(rescale(1023, AdcResolution::Bits10), 255);
        assert_eq!(rescale(4095, AdcResolution::Bits12), 255);
        assert_eq!(rescale(1023, AdcResolution::Auto), 255);
        assert_eq!(rescale(4095, AdcResolution::Auto), 255);
    }

    #[test]
    fn out_of_range_is_clamped() {
        assert_eq!(rescale(4095, AdcResolution::Bits10), 255);
        assert_eq!(rescale(u16::MAX, AdcResolution::Bits12), 255);
        assert_eq!(rescale(u16::MAX, AdcResolution::Auto), 255);
    }

    #[test]
    fn midscale_truncates() {
        // 512 * 255 / 1023 = 127.6
        assert_eq!(rescale(512, AdcResolution::Bits10), 127);
        // 2048 * 255 / 4095 = 127.5
        assert_eq!(rescale(2048, AdcResolution::Auto), 127);
    }

    #[test]
    fn rail_is_powered_only_around_the_read() {
        let mut gsr = reader(700, AdcResolution::Bits10);
        let mut delay = RecordingDelay::default();
        assert_eq!(gsr.read_level(&mut delay), 174);
        assert_eq!(gsr.sensor().events, vec!["on", "read", "off"]);
        assert!(!gsr.sensor().rail);
        assert_eq!(delay.0, vec![Duration::from_millis(20)]);
    }

    #[test]
    fn rail_toggles_on_every_call() {
        for raw in [0, 1023, 4095, u16::MAX] {
            let mut gsr = reader(raw, AdcResolution::Auto);
            let mut delay = RecordingDelay::default();
            gsr.read_level(&mut delay);
            gsr.read_level(&mut delay);
            assert_eq!(
                gsr.sensor().events,
                vec!["on", "read", "off", "on", "read", "off"]
            );
            assert!(!gsr.sensor().rail);
        }
    }
}
