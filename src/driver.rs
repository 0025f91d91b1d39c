//! The badge's main loop: wait for a receiver, then sample every sensor,
//! format a [Record], notify it, and sleep, until the receiver goes away.

use crate::{
    audio,
    conductance::ConductanceReader,
    config::BadgeConfig,
    error::{BadgeError, Subsystem},
    link_quality,
    motion::MotionExtractor,
    peripherals::{ConductanceSensor, Delay, Microphone, MotionSensor, PeerHandle, RadioLink},
    record::Record,
    sample_buffer::SampleBuffer,
};
use log::{debug, info, warn};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

/// Whether the badge currently has a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Nobody connected, waiting
    Idle,
    /// Cycling records out to this peer
    Streaming(PeerHandle),
}

/// What one call to [Badge::step] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Still no receiver
    Idle,
    /// A record was handed to the stack. It may still have been dropped
    /// there, nobody checks.
    Sent(Record),
    /// The receiver left before the record went out. The record was thrown
    /// away and the badge is Idle again.
    Disconnected(Record),
}

/// All of the badge's state in one place: its peripherals, the audio sample
/// buffer, the held motion reading, and where the cycle is.
pub struct Badge<R, M, IMU, S, D>
where
    R: RadioLink,
    M: Microphone,
    IMU: MotionSensor,
    S: ConductanceSensor,
    D: Delay,
{
    radio: R,
    // Kept so the capture source lives as long as the badge does.
    microphone: M,
    samples: SampleBuffer,
    imu: IMU,
    motion: MotionExtractor,
    conductance: Option<ConductanceReader<S>>,
    delay: D,
    interval: Duration,
    state: DriverState,
}

impl<R, M, IMU, S, D> Badge<R, M, IMU, S, D>
where
    R: RadioLink,
    M: Microphone,
    IMU: MotionSensor,
    S: ConductanceSensor,
    D: Delay,
{
    /// Brings up every subsystem and starts advertising.
    ///
    /// Any subsystem failing is fatal: a badge with a missing sensor would
    /// send records with the wrong meaning in some field, so it does not
    /// run at all. `conductance` must be given exactly when the config
    /// enables the sensor.
    pub fn start(
        config: &BadgeConfig,
        mut radio: R,
        mut microphone: M,
        mut imu: IMU,
        conductance: Option<S>,
        delay: D,
    ) -> Result<Self, BadgeError> {
        let (samples, writer) = SampleBuffer::new(config.buffer_capacity);

        microphone.begin(config.sample_rate, config.channels, writer)?;
        info!(
            "microphone started at {} Hz, {} channel(s)",
            config.sample_rate, config.channels
        );

        imu.begin()?;
        info!("motion sensor started");

        let conductance = match (config.conductance_enabled, conductance) {
            (true, Some(mut sensor)) => {
                sensor.begin()?;
                info!(
                    "conductance sensor started, settle {:?}, {:?}",
                    config.settle_delay(),
                    config.adc_resolution
                );
                Some(ConductanceReader::new(
                    sensor,
                    config.settle_delay(),
                    config.adc_resolution,
                ))
            }
            (true, None) => {
                return Err(BadgeError::init(
                    Subsystem::Conductance,
                    "enabled in config but no sensor given",
                ))
            }
            (false, Some(_)) => {
                warn!("conductance sensor given but disabled in config, ignoring it");
                None
            }
            (false, None) => None,
        };

        radio.begin()?;
        radio.advertise(
            &config.device_name,
            &config.service_uuid,
            &config.characteristic_uuid,
        )?;
        info!("advertising as {:?}", config.device_name);

        Ok(Self {
            radio,
            microphone,
            samples,
            imu,
            motion: MotionExtractor::new(),
            conductance,
            delay,
            interval: config.cycle_interval(),
            state: DriverState::Idle,
        })
    }

    /// Where the cycle is.
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// The wireless stack.
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// The capture source.
    pub fn microphone_mut(&mut self) -> &mut M {
        &mut self.microphone
    }

    /// The held motion state.
    pub fn motion(&self) -> &MotionExtractor {
        &self.motion
    }

    /// The conductance reader, if the sensor is enabled.
    pub fn conductance(&self) -> Option<&ConductanceReader<S>> {
        self.conductance.as_ref()
    }

    /// Samples every sensor once, in the order audio, link quality, motion,
    /// conductance, and builds a record out of whatever they returned.
    pub fn sample(&mut self, peer: PeerHandle) -> Record {
        let sound_power = audio::sound_power(&self.samples);
        let rssi = link_quality::rssi(&self.radio, peer);
        let motion = self.motion.intensity(&mut self.imu);
        let conductance = self
            .conductance
            .as_mut()
            .map(|gsr| gsr.read_level(&mut self.delay));

        Record {
            sound_power,
            rssi,
            motion,
            conductance,
        }
    }

    /// Advances the badge by one cycle.
    ///
    /// When Idle this checks for a new peer, and if there is one, runs a full
    /// cycle to it straight away. When Streaming the connection is checked
    /// once per cycle, after sampling and before the record goes out.
    pub fn step(&mut self) -> Step {
        if self.state == DriverState::Idle {
            match self.radio.connected_peer() {
                Some(peer) => {
                    info!("peer {:?} connected", peer);
                    self.state = DriverState::Streaming(peer);
                }
                None => {
                    self.delay.delay(self.interval);
                    return Step::Idle;
                }
            }
        }

        let DriverState::Streaming(peer) = self.state else {
            return Step::Idle;
        };

        let record = self.sample(peer);
        if !self.radio.is_connected(peer) {
            info!("peer {:?} disconnected", peer);
            self.state = DriverState::Idle;
            return Step::Disconnected(record);
        }

        let payload = record.to_string();
        match self.radio.notify(payload.as_bytes()) {
            Ok(()) => debug!("sent {}", payload),
            Err(e) => debug!("dropped {}: {}", payload, e),
        }
        self.delay.delay(self.interval);
        Step::Sent(record)
    }

    /// Runs the cycle until `stop` is set.
    pub fn run_until(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            self.step();
        }
        info!("stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        peripherals::Axes,
        sim::{SimConductance, SimMicrophone, SimRadio, SimRadioController},
    };
    use std::{
        collections::VecDeque,
        sync::{mpsc::Receiver, Arc, Mutex},
    };

    /// Counts sleeps instead of sleeping.
    #[derive(Default)]
    struct FakeDelay(Vec<Duration>);

    impl Delay for FakeDelay {
        fn delay(&mut self, duration: Duration) {
            self.0.push(duration);
        }
    }

    /// Replays queued readings, and can pull the plug on the peer while it
    /// is being read, which is as mid-cycle as it gets.
    struct ScriptedImu {
        readings: VecDeque<Option<Axes>>,
        pending: Option<Axes>,
        disconnect_on_read: Option<(usize, SimRadioController)>,
        rssi_on_read: Option<(usize, i16, SimRadioController)>,
        events: Option<Events>,
        reads: usize,
    }

    impl ScriptedImu {
        fn new(readings: Vec<Option<Axes>>) -> Self {
            Self {
                readings: readings.into(),
                pending: None,
                disconnect_on_read: None,
                rssi_on_read: None,
                events: None,
                reads: 0,
            }
        }
    }

    impl MotionSensor for ScriptedImu {
        fn begin(&mut self) -> Result<(), BadgeError> {
            Ok(())
        }
        fn reading_ready(&mut self) -> bool {
            self.reads += 1;
            if let Some((n, ctl)) = &self.disconnect_on_read {
                if *n == self.reads {
                    ctl.disconnect();
                }
            }
            if let Some((n, rssi, ctl)) = &self.rssi_on_read {
                if *n == self.reads {
                    ctl.set_rssi(*rssi);
                }
            }
            if let Some(events) = &self.events {
                events.lock().unwrap().push("motion");
            }
            self.pending = self.readings.pop_front().flatten();
            self.pending.is_some()
        }
        fn read_axes(&mut self) -> Axes {
            self.pending.take().unwrap_or_default()
        }
    }

    type Events = Arc<Mutex<Vec<&'static str>>>;

    /// Logs what happens to it into a shared list, to check ordering
    /// against the motion sensor.
    struct LoggingGsr {
        events: Events,
    }

    impl ConductanceSensor for LoggingGsr {
        fn begin(&mut self) -> Result<(), BadgeError> {
            Ok(())
        }
        fn set_rail(&mut self, on: bool) {
            self.events
                .lock()
                .unwrap()
                .push(if on { "rail on" } else { "rail off" });
        }
        fn read_raw(&mut self) -> u16 {
            self.events.lock().unwrap().push("gsr");
            512
        }
    }

    struct BrokenImu;

    impl MotionSensor for BrokenImu {
        fn begin(&mut self) -> Result<(), BadgeError> {
            Err(BadgeError::init(Subsystem::Motion, "no IMU on the bus"))
        }
        fn reading_ready(&mut self) -> bool {
            false
        }
        fn read_axes(&mut self) -> Axes {
            [0.0; 3]
        }
    }

    type TestBadge<IMU> = Badge<SimRadio, SimMicrophone, IMU, SimConductance, FakeDelay>;

    fn config(conductance_enabled: bool) -> BadgeConfig {
        BadgeConfig {
            buffer_capacity: 4,
            conductance_enabled,
            ..BadgeConfig::default()
        }
    }

    fn start<IMU: MotionSensor>(
        cfg: &BadgeConfig,
        imu: IMU,
        gsr: Option<SimConductance>,
    ) -> (TestBadge<IMU>, SimRadioController, Receiver<String>) {
        let mut radio = SimRadio::new();
        let ctl = radio.controller();
        let rx = radio.subscribe();
        let badge = Badge::start(
            cfg,
            radio,
            SimMicrophone::manual(),
            imu,
            gsr,
            FakeDelay::default(),
        )
        .unwrap();
        (badge, ctl, rx)
    }

    #[test]
    fn idles_until_a_peer_connects() {
        let (mut badge, _ctl, rx) = start(&config(false), ScriptedImu::new(vec![]), None);
        assert_eq!(badge.step(), Step::Idle);
        assert_eq!(badge.step(), Step::Idle);
        assert_eq!(badge.state(), DriverState::Idle);
        assert!(rx.try_recv().is_err());
        assert_eq!(badge.delay.0.len(), 2);
    }

    #[test]
    fn connect_stream_disconnect() {
        let mut radio = SimRadio::new();
        let ctl = radio.controller();
        let rx = radio.subscribe();
        let mut imu = ScriptedImu::new(vec![None, Some([0.5, -0.25, 1.0]), Some([0.0; 3])]);
        // The third read happens mid-cycle, before anything is sent.
        imu.disconnect_on_read = Some((3, ctl.clone()));
        let mut badge = Badge::start(
            &config(false),
            radio,
            SimMicrophone::manual(),
            imu,
            None::<SimConductance>,
            FakeDelay::default(),
        )
        .unwrap();

        let peer = ctl.connect(-61);

        // First cycle: no audio yet and no motion reading, both fall back.
        let first = badge.step();
        assert_eq!(
            first,
            Step::Sent(Record {
                sound_power: None,
                rssi: -61,
                motion: None,
                conductance: None,
            })
        );
        assert_eq!(badge.state(), DriverState::Streaming(peer));
        assert_eq!(rx.try_recv().unwrap(), "-1,-61,-1.000");

        // Second cycle: audio captured, accelerometer moved.
        badge
            .microphone_mut()
            .deliver(&[10, -10, 20, 0])
            .unwrap();
        ctl.set_rssi(-58);
        let second = badge.step();
        assert_eq!(
            second,
            Step::Sent(Record {
                sound_power: Some(150),
                rssi: -58,
                motion: Some(1.75),
                conductance: None,
            })
        );
        assert_eq!(rx.try_recv().unwrap(), "150,-58,1.750");
        assert_eq!(badge.motion().previous(), [0.5, -0.25, 1.0]);
        assert_eq!(badge.delay.0, vec![Duration::from_millis(100); 2]);

        // Third cycle: the peer leaves while the IMU is being read.
        assert!(matches!(badge.step(), Step::Disconnected(_)));
        assert_eq!(badge.state(), DriverState::Idle);
        assert!(rx.try_recv().is_err());
        assert_eq!(badge.delay.0.len(), 2);

        // And we are back to waiting.
        assert_eq!(badge.step(), Step::Idle);
    }

    #[test]
    fn rssi_is_read_before_motion() {
        let mut radio = SimRadio::new();
        let ctl = radio.controller();
        let rx = radio.subscribe();
        let mut imu = ScriptedImu::new(vec![]);
        // The signal changes while the first cycle reads the IMU.
        imu.rssi_on_read = Some((1, -75, ctl.clone()));
        let mut badge = Badge::start(
            &config(false),
            radio,
            SimMicrophone::manual(),
            imu,
            None::<SimConductance>,
            FakeDelay::default(),
        )
        .unwrap();
        ctl.connect(-61);

        badge.step();
        assert_eq!(rx.try_recv().unwrap(), "-1,-61,-1.000");
        badge.step();
        assert_eq!(rx.try_recv().unwrap(), "-1,-75,-1.000");
    }

    #[test]
    fn conductance_is_read_after_motion() {
        let events = Events::default();
        let mut imu = ScriptedImu::new(vec![Some([0.5, 0.0, 0.0])]);
        imu.events = Some(Arc::clone(&events));
        let mut radio = SimRadio::new();
        let ctl = radio.controller();
        let rx = radio.subscribe();
        let mut badge = Badge::start(
            &config(true),
            radio,
            SimMicrophone::manual(),
            imu,
            Some(LoggingGsr {
                events: Arc::clone(&events),
            }),
            FakeDelay::default(),
        )
        .unwrap();
        ctl.connect(-70);

        badge.step();
        assert_eq!(rx.try_recv().unwrap(), "-1,-70,0.500,127");
        assert_eq!(
            *events.lock().unwrap(),
            vec!["motion", "rail on", "gsr", "rail off"]
        );
    }

    #[test]
    fn conductance_adds_a_fourth_field() {
        let (mut badge, ctl, rx) = start(
            &config(true),
            ScriptedImu::new(vec![Some([0.5, 0.0, 0.0])]),
            Some(SimConductance::fixed(1023)),
        );
        ctl.connect(-70);
        badge.step();
        assert_eq!(rx.try_recv().unwrap(), "-1,-70,0.500,255");
        let gsr = badge.conductance().unwrap().sensor();
        assert!(!gsr.rail());
        assert_eq!(gsr.rail_toggles(), 2);
        // settle, then the cycle sleep
        assert_eq!(
            badge.delay.0,
            vec![Duration::from_millis(20), Duration::from_millis(100)]
        );
    }

    #[test]
    fn delivery_failures_are_not_retried() {
        let (mut badge, ctl, rx) = start(&config(false), ScriptedImu::new(vec![]), None);
        ctl.connect(-61);
        ctl.set_queue_full(true);
        assert!(matches!(badge.step(), Step::Sent(_)));
        ctl.set_queue_full(false);
        assert!(matches!(badge.step(), Step::Sent(_)));
        // Only the second record made it, the first is simply gone.
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn reconnecting_streams_again() {
        let (mut badge, ctl, rx) = start(&config(false), ScriptedImu::new(vec![]), None);
        ctl.connect(-61);
        badge.step();
        ctl.disconnect();
        assert!(matches!(badge.step(), Step::Disconnected(_)));
        let peer = ctl.connect(-50);
        assert!(matches!(badge.step(), Step::Sent(_)));
        assert_eq!(badge.state(), DriverState::Streaming(peer));
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn init_failure_is_fatal() {
        let res = Badge::<SimRadio, SimMicrophone, BrokenImu, SimConductance, FakeDelay>::start(
            &config(false),
            SimRadio::new(),
            SimMicrophone::manual(),
            BrokenImu,
            None,
            FakeDelay::default(),
        );
        assert!(matches!(
            res,
            Err(BadgeError::Init {
                subsystem: Subsystem::Motion,
                ..
            })
        ));
    }

    #[test]
    fn enabled_conductance_needs_a_sensor() {
        let res = Badge::<SimRadio, SimMicrophone, ScriptedImu, SimConductance, FakeDelay>::start(
            &config(true),
            SimRadio::new(),
            SimMicrophone::manual(),
            ScriptedImu::new(vec![]),
            None,
            FakeDelay::default(),
        );
        assert!(matches!(
            res,
            Err(BadgeError::Init {
                subsystem: Subsystem::Conductance,
                ..
            })
        ));
    }
}
