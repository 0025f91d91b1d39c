//! Software stand-ins for the badge's hardware, so the whole cycle can run on
//! a desktop: a radio whose peer can be connected and disconnected at will,
//! a microphone "interrupt" running on its own thread, a wandering
//! accelerometer and a conductance sensor.

use crate::{
    error::{BadgeError, Subsystem},
    peripherals::{
        Axes, ConductanceSensor, Microphone, MotionSensor, NotifyError, PeerHandle, RadioLink,
    },
    sample_buffer::SampleWriter,
};
use hound::WavReader;
use log::{debug, info};
use rand::prelude::*;
use std::{
    path::Path,
    sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

/// What most stacks report for the signal strength of a peer they know
/// nothing about.
pub const RSSI_UNKNOWN: i16 = 127;

#[derive(Debug, Default)]
struct Link {
    peer: Option<PeerHandle>,
    rssi: i16,
    next_peer: u64,
    queue_full: bool,
    advertised: Option<String>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [RadioLink] with a single simulated peer, steered through a
/// [SimRadioController].
#[derive(Debug, Default)]
pub struct SimRadio {
    link: Arc<Mutex<Link>>,
    subscriber: Option<mpsc::Sender<String>>,
    started: bool,
}

/// The far side of a [SimRadio]. Clones all steer the same radio, and can
/// live on other threads.
#[derive(Debug, Clone)]
pub struct SimRadioController {
    link: Arc<Mutex<Link>>,
}

impl SimRadio {
    /// Instantiates a radio with nobody connected.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle for connecting, disconnecting and tuning the simulated peer.
    pub fn controller(&self) -> SimRadioController {
        SimRadioController {
            link: Arc::clone(&self.link),
        }
    }

    /// Every notification accepted from now on shows up on the returned
    /// channel, one record per message.
    pub fn subscribe(&mut self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel();
        self.subscriber = Some(tx);
        rx
    }

    /// The name passed to the last [RadioLink::advertise].
    pub fn advertised_name(&self) -> Option<String> {
        lock(&self.link).advertised.clone()
    }
}

impl SimRadioController {
    /// Connects a fresh peer with the given signal strength and returns its
    /// handle. Replaces any peer already connected.
    pub fn connect(&self, rssi: i16) -> PeerHandle {
        let mut link = lock(&self.link);
        link.next_peer += 1;
        let peer = PeerHandle(link.next_peer);
        link.peer = Some(peer);
        link.rssi = rssi;
        debug!("sim: {:?} connected at {} dBm", peer, rssi);
        peer
    }

    /// Drops the current peer, if any.
    pub fn disconnect(&self) {
        if let Some(peer) = lock(&self.link).peer.take() {
            debug!("sim: {:?} disconnected", peer);
        }
    }

    /// Whether a peer is connected.
    pub fn is_connected(&self) -> bool {
        lock(&self.link).peer.is_some()
    }

    /// Changes the signal strength the stack will report.
    pub fn set_rssi(&self, rssi: i16) {
        lock(&self.link).rssi = rssi;
    }

    /// The signal strength the stack currently reports.
    pub fn current_rssi(&self) -> i16 {
        lock(&self.link).rssi
    }

    /// Makes every notification fail as if the outgoing queue were full.
    pub fn set_queue_full(&self, full: bool) {
        lock(&self.link).queue_full = full;
    }
}

impl RadioLink for SimRadio {
    fn begin(&mut self) -> Result<(), BadgeError> {
        if self.started {
            return Err(BadgeError::init(Subsystem::Radio, "already started"));
        }
        self.started = true;
        Ok(())
    }

    fn advertise(
        &mut self,
        name: &str,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<(), BadgeError> {
        if !self.started {
            return Err(BadgeError::init(
                Subsystem::Radio,
                "advertising before the stack is up",
            ));
        }
        info!(
            "sim: advertising {:?}, service {}, characteristic {}",
            name, service_uuid, characteristic_uuid
        );
        lock(&self.link).advertised = Some(name.to_owned());
        Ok(())
    }

    fn connected_peer(&mut self) -> Option<PeerHandle> {
        lock(&self.link).peer
    }

    fn is_connected(&self, peer: PeerHandle) -> bool {
        lock(&self.link).peer == Some(peer)
    }

    fn rssi(&self, peer: PeerHandle) -> i16 {
        let link = lock(&self.link);
        if link.peer == Some(peer) {
            link.rssi
        } else {
            RSSI_UNKNOWN
        }
    }

    fn notify(&mut self, payload: &[u8]) -> Result<(), NotifyError> {
        {
            let link = lock(&self.link);
            if link.peer.is_none() {
                return Err(NotifyError::NoSubscriber);
            }
            if link.queue_full {
                return Err(NotifyError::QueueFull);
            }
        }
        let text = String::from_utf8_lossy(payload).into_owned();
        match &self.subscriber {
            Some(tx) => tx.send(text).map_err(|_| NotifyError::NoSubscriber),
            None => Ok(()),
        }
    }
}

enum Signal {
    Amplitude(i16),
    Stop,
}

enum Source {
    Manual,
    Noise(i16),
    Wav(Vec<i16>),
}

/// A [Microphone] whose "interrupt" is a thread that overwrites the sample
/// buffer every few milliseconds, the way a PDM data-ready callback would.
///
/// A manual microphone has no thread; samples are pushed with
/// [SimMicrophone::deliver] instead.
pub struct SimMicrophone {
    source: Option<Source>,
    chunk: usize,
    writer: Option<SampleWriter>,
    handle: Option<thread::JoinHandle<()>>,
    tx: Option<mpsc::Sender<Signal>>,
}

impl SimMicrophone {
    fn with_source(source: Source) -> Self {
        Self {
            source: Some(source),
            chunk: 256,
            writer: None,
            handle: None,
            tx: None,
        }
    }

    /// A microphone that only delivers what it is handed.
    pub fn manual() -> Self {
        Self::with_source(Source::Manual)
    }

    /// A microphone hearing uniform noise of up to `amplitude`.
    pub fn noise(amplitude: i16) -> Self {
        Self::with_source(Source::Noise(amplitude))
    }

    /// A microphone that plays back the samples of a 16-bit WAV file, on a
    /// loop.
    pub fn from_wav(path: impl AsRef<Path>) -> Result<Self, BadgeError> {
        let mut reader = WavReader::open(path)?;
        let samples = reader.samples::<i16>().collect::<Result<Vec<i16>, _>>()?;
        if samples.is_empty() {
            return Err(BadgeError::init(Subsystem::Microphone, "wav file is empty"));
        }
        Ok(Self::with_source(Source::Wav(samples)))
    }

    /// How many samples each callback delivers. Defaults to 256.
    pub fn chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// Pushes `samples` through the callback by hand. Returns how many the
    /// buffer kept.
    pub fn deliver(&mut self, samples: &[i16]) -> Result<usize, BadgeError> {
        match &self.writer {
            Some(writer) => Ok(writer.on_samples_ready(samples)),
            None => Err(BadgeError::init(
                Subsystem::Microphone,
                "not started, or owned by the capture thread",
            )),
        }
    }

    /// Changes the noise level of a noise microphone.
    pub fn set_amplitude(&self, amplitude: i16) {
        if let Some(tx) = &self.tx {
            // The thread only stops after `stop`, nothing to do if it is gone.
            let _ = tx.send(Signal::Amplitude(amplitude));
        }
    }

    /// Stops the capture thread, if there is one.
    pub fn stop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Signal::Stop);
        }
        if let Some(thread) = self.handle.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SimMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Microphone for SimMicrophone {
    fn begin(
        &mut self,
        sample_rate: u32,
        channels: u16,
        writer: SampleWriter,
    ) -> Result<(), BadgeError> {
        if sample_rate == 0 || channels == 0 {
            return Err(BadgeError::init(
                Subsystem::Microphone,
                format!("unsupported format {} Hz x {}", sample_rate, channels),
            ));
        }
        let source = self
            .source
            .take()
            .ok_or_else(|| BadgeError::init(Subsystem::Microphone, "already started"))?;

        let mut amplitude = match source {
            Source::Manual => {
                self.writer = Some(writer);
                return Ok(());
            }
            Source::Noise(amplitude) => amplitude,
            Source::Wav(_) => 0,
        };

        let chunk = self.chunk;
        let period = Duration::from_secs_f64(chunk as f64 / (sample_rate as f64 * channels as f64));
        let (tx, rx) = mpsc::channel::<Signal>();
        let handle = thread::spawn(move || {
            let mut rng = thread_rng();
            let mut buf = vec![0i16; chunk];
            let mut cursor = 0;
            loop {
                match rx.try_recv() {
                    Ok(Signal::Amplitude(a)) => amplitude = a,
                    Ok(Signal::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
                    Err(mpsc::TryRecvError::Empty) => {}
                }
                match &source {
                    Source::Wav(samples) => {
                        for slot in buf.iter_mut() {
                            *slot = samples[cursor];
                            cursor = (cursor + 1) % samples.len();
                        }
                    }
                    _ => {
                        let a = amplitude.unsigned_abs() as i32;
                        for slot in buf.iter_mut() {
                            *slot = rng.gen_range(-a..=a) as i16;
                        }
                    }
                }
                writer.on_samples_ready(&buf);
                thread::sleep(period);
            }
        });

        self.handle = Some(handle);
        self.tx = Some(tx);
        Ok(())
    }
}

/// An accelerometer that wanders around 1 g on Z. A new reading is ready
/// with probability `ready_chance` each time it is asked.
pub struct SimMotion {
    rng: StdRng,
    axes: Axes,
    step: f32,
    ready_chance: f64,
}

impl SimMotion {
    /// A sensor that always has a new reading, moving by up to `step` per
    /// axis between readings.
    pub fn new(seed: u64, step: f32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            axes: [0.0, 0.0, 1.0],
            step: step.abs(),
            ready_chance: 1.0,
        }
    }

    /// Sets how likely a new reading is each time one is asked for.
    pub fn ready_chance(mut self, chance: f64) -> Self {
        self.ready_chance = chance.clamp(0.0, 1.0);
        self
    }
}

impl MotionSensor for SimMotion {
    fn begin(&mut self) -> Result<(), BadgeError> {
        Ok(())
    }

    fn reading_ready(&mut self) -> bool {
        self.rng.gen_bool(self.ready_chance)
    }

    fn read_axes(&mut self) -> Axes {
        if self.step > 0.0 {
            for axis in self.axes.iter_mut() {
                *axis += self.rng.gen_range(-self.step..=self.step);
            }
        }
        self.axes
    }
}

/// A conductance sensor that reads 0 while unpowered and a value drifting
/// around its baseline while powered.
#[derive(Debug)]
pub struct SimConductance {
    rng: StdRng,
    baseline: u16,
    drift: u16,
    rail: bool,
    toggles: usize,
}

impl SimConductance {
    /// A sensor that always reads exactly `raw` when powered.
    pub fn fixed(raw: u16) -> Self {
        Self::drifting(0, raw, 0)
    }

    /// A sensor reading `baseline` give or take `drift`.
    pub fn drifting(seed: u64, baseline: u16, drift: u16) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            baseline,
            drift,
            rail: false,
            toggles: 0,
        }
    }

    /// Whether the rail is currently powered.
    pub fn rail(&self) -> bool {
        self.rail
    }

    /// How many times the rail has been switched.
    pub fn rail_toggles(&self) -> usize {
        self.toggles
    }
}

impl ConductanceSensor for SimConductance {
    fn begin(&mut self) -> Result<(), BadgeError> {
        self.rail = false;
        Ok(())
    }

    fn set_rail(&mut self, on: bool) {
        self.rail = on;
        self.toggles += 1;
    }

    fn read_raw(&mut self) -> u16 {
        if !self.rail {
            return 0;
        }
        let drift = self.drift as i32;
        let raw = self.baseline as i32 + self.rng.gen_range(-drift..=drift);
        raw.clamp(0, u16::MAX as i32) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_buffer::SampleBuffer;
    use hound::{SampleFormat, WavSpec, WavWriter};

    #[test]
    fn radio_tracks_a_single_peer() {
        let mut radio = SimRadio::new();
        let ctl = radio.controller();
        assert_eq!(radio.connected_peer(), None);
        let first = ctl.connect(-60);
        assert!(radio.is_connected(first));
        let second = ctl.connect(-40);
        assert!(!radio.is_connected(first));
        assert_eq!(radio.rssi(first), RSSI_UNKNOWN);
        assert_eq!(radio.rssi(second), -40);
        ctl.disconnect();
        assert_eq!(radio.connected_peer(), None);
    }

    #[test]
    fn radio_must_start_before_advertising() {
        let mut radio = SimRadio::new();
        assert!(radio.advertise("Badge", "s", "c").is_err());
        radio.begin().unwrap();
        radio.advertise("Badge04", "s", "c").unwrap();
        assert_eq!(radio.advertised_name().as_deref(), Some("Badge04"));
        assert!(radio.begin().is_err());
    }

    #[test]
    fn notify_needs_a_peer() {
        let mut radio = SimRadio::new();
        let rx = radio.subscribe();
        assert_eq!(radio.notify(b"1,2,3.000"), Err(NotifyError::NoSubscriber));
        radio.controller().connect(-50);
        radio.notify(b"1,2,3.000").unwrap();
        assert_eq!(rx.recv().unwrap(), "1,2,3.000");
    }

    #[test]
    fn manual_microphone_delivers_on_demand() {
        let mut mic = SimMicrophone::manual();
        assert!(mic.deliver(&[1]).is_err());
        let (buf, writer) = SampleBuffer::new(4);
        mic.begin(16_000, 1, writer).unwrap();
        assert_eq!(mic.deliver(&[1, 2, 3]).unwrap(), 3);
        assert_eq!(buf.valid(), 3);
    }

    #[test]
    fn noise_microphone_fills_the_buffer() {
        let (buf, writer) = SampleBuffer::new(64);
        let mut mic = SimMicrophone::noise(1000).chunk(64);
        mic.begin(16_000, 1, writer).unwrap();
        // 64 samples at 16 kHz is 4ms a chunk
        for _ in 0..100 {
            if buf.valid() == 64 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        mic.stop();
        assert_eq!(buf.valid(), 64);
        assert!(buf.with_samples(|s| s.iter().all(|x| x.abs() <= 1000)));
    }

    #[test]
    fn wav_microphone_plays_the_file() {
        let tempfile = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(tempfile.path(), spec).unwrap();
        for _ in 0..32 {
            writer.write_sample(500i16).unwrap();
        }
        writer.finalize().unwrap();

        let (buf, sample_writer) = SampleBuffer::new(16);
        let mut mic = SimMicrophone::from_wav(tempfile.path()).unwrap().chunk(16);
        mic.begin(8000, 1, sample_writer).unwrap();
        for _ in 0..100 {
            if buf.valid() == 16 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        mic.stop();
        assert!(buf.with_samples(|s| s.len() == 16 && s.iter().all(|&x| x == 500)));
    }

    #[test]
    fn microphone_starts_once() {
        let mut mic = SimMicrophone::manual();
        let (_buf, writer) = SampleBuffer::new(4);
        mic.begin(16_000, 1, writer).unwrap();
        let (_buf, writer) = SampleBuffer::new(4);
        assert!(mic.begin(16_000, 1, writer).is_err());
    }

    #[test]
    fn unpowered_conductance_reads_zero() {
        let mut gsr = SimConductance::drifting(7, 600, 20);
        assert_eq!(gsr.read_raw(), 0);
        gsr.set_rail(true);
        let raw = gsr.read_raw();
        assert!((580..=620).contains(&raw));
        gsr.set_rail(false);
        assert_eq!(gsr.rail_toggles(), 2);
    }

    #[test]
    fn seeded_motion_is_repeatable() {
        let mut a = SimMotion::new(3, 0.05);
        let mut b = SimMotion::new(3, 0.05);
        for _ in 0..10 {
            assert_eq!(a.read_axes(), b.read_axes());
        }
    }
}
