//! The boundary between the badge core and the hardware it runs on.
//!
//! Each trait is the handful of operations the core actually uses from a
//! vendor driver or the wireless stack. Real boards implement them over their
//! drivers; [crate::sim] implements them in software.

use crate::{error::BadgeError, sample_buffer::SampleWriter};
use std::{fmt, time::Duration};

/// Latest acceleration, in X, Y, Z order.
pub type Axes = [f32; 3];

/// An opaque reference to the connected peer. Only meaningful while that
/// peer stays connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle(pub u64);

/// Why the stack did not take a notification. The core never retries, this
/// only exists so it can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyError {
    /// The outgoing notification queue is full
    QueueFull,
    /// Nobody is subscribed
    NoSubscriber,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NotifyError::QueueFull => write!(f, "notification queue full"),
            NotifyError::NoSubscriber => write!(f, "no subscriber"),
        }
    }
}

/// The wireless stack.
pub trait RadioLink {
    /// Brings the stack up.
    fn begin(&mut self) -> Result<(), BadgeError>;

    /// Advertises `name` with one service carrying one write/notify
    /// characteristic.
    fn advertise(
        &mut self,
        name: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<(), BadgeError>;

    /// The currently connected peer, if any.
    fn connected_peer(&mut self) -> Option<PeerHandle>;

    /// Whether `peer` is still connected.
    fn is_connected(&self, peer: PeerHandle) -> bool;

    /// The stack's latest signal strength measurement for `peer`, sentinels
    /// and all.
    fn rssi(&self, peer: PeerHandle) -> i16;

    /// Pushes `payload` to every subscriber of the characteristic.
    fn notify(&mut self, payload: &[u8]) -> Result<(), NotifyError>;
}

/// The audio capture source. Once started it calls back into the
/// [SampleWriter] on its own schedule.
pub trait Microphone {
    /// Starts capture at the given format, delivering samples to `writer`.
    fn begin(
        &mut self,
        sample_rate: u32,
        channels: u16,
        writer: SampleWriter,
    ) -> Result<(), BadgeError>;
}

/// A 3-axis accelerometer.
pub trait MotionSensor {
    /// Initializes the sensor.
    fn begin(&mut self) -> Result<(), BadgeError>;

    /// Whether a reading has arrived since the last [MotionSensor::read_axes].
    fn reading_ready(&mut self) -> bool;

    /// The current X, Y, Z acceleration.
    fn read_axes(&mut self) -> Axes;
}

/// A skin-conductance sensor behind a switchable power rail.
pub trait ConductanceSensor {
    /// Configures the rail pin and the ADC.
    fn begin(&mut self) -> Result<(), BadgeError>;

    /// Energizes or de-energizes the sensor.
    fn set_rail(&mut self, on: bool);

    /// One raw ADC sample.
    fn read_raw(&mut self) -> u16;
}

/// Blocking sleep.
pub trait Delay {
    /// Sleeps for `duration`.
    fn delay(&mut self, duration: Duration);
}

/// [Delay] backed by [spin_sleep], which keeps the cycle cadence closer to
/// the requested interval than a plain thread sleep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinDelay;

impl Delay for SpinDelay {
    fn delay(&mut self, duration: Duration) {
        spin_sleep::sleep(duration);
    }
}
