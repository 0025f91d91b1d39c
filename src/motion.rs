//! Motion intensity from the accelerometer.

use crate::peripherals::{Axes, MotionSensor};
use log::trace;

/// Holds the last acceleration seen on each axis and turns new readings into
/// a single "how much did we move" number.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MotionExtractor {
    previous: Axes,
}

impl MotionExtractor {
    /// Instantiates an extractor whose previous reading is all zeros.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored X, Y, Z.
    pub fn previous(&self) -> Axes {
        self.previous
    }

    /// Sum of the absolute per-axis change since the stored reading, or
    /// `None` if the sensor has nothing new.
    pub fn intensity<M: MotionSensor>(&mut self, sensor: &mut M) -> Option<f32> {
        if !sensor.reading_ready() {
            trace!("no new accelerometer reading");
            return None;
        }
        Some(self.update(sensor.read_axes()))
    }

    /// Folds `current` into the stored reading and returns the summed change.
    ///
    /// An axis only moves its stored value when it differs. A sensor that
    /// repeats the exact same float on an axis looks like that axis did
    /// nothing at all.
    pub fn update(&mut self, current: Axes) -> f32 {
        self.previous
            .iter_mut()
            .zip(current)
            .map(|(prev, now)| {
                if now != *prev {
                    let delta = (now - *prev).abs();
                    *prev = now;
                    delta
                } else {
                    0.0
                }
            })
            .sum()
    }
}
