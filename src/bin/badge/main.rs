//! Runs the badge cycle on simulated hardware and prints every record the
//! simulated receiver gets, one per line, so the output can be piped into
//! the receiver:
//!
//! ```text
//! cargo run --bin badge -- --gsr --session 5 | cargo run --bin receiver -- --stdin --live
//! ```

use badgestream::{
    args::BadgeArgs,
    config::BadgeConfig,
    driver::Badge,
    error::BadgeError,
    peripherals::SpinDelay,
    sim::{SimConductance, SimMicrophone, SimMotion, SimRadio, SimRadioController},
};
use clap::Parser;
use log::{error, info};
use rand::prelude::*;
use std::{
    io::{self, Write},
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{sleep, spawn},
    time::{Duration, Instant},
};

const TICK: Duration = Duration::from_millis(500);

/// Plays the receiver: stays connected for `session` at a time (forever if
/// `None`), nudging the signal strength around, until `stop` is set or
/// `duration` runs out.
fn simulate_peer(
    ctl: SimRadioController,
    rssi: i16,
    session: Option<Duration>,
    duration: Option<Duration>,
    stop: Arc<AtomicBool>,
) {
    let mut rng = thread_rng();
    let started = Instant::now();
    let mut phase_started = Instant::now();
    ctl.connect(rssi);

    while !stop.load(Ordering::Relaxed) {
        sleep(TICK);
        if duration.is_some_and(|d| started.elapsed() >= d) {
            stop.store(true, Ordering::Relaxed);
            break;
        }
        if ctl.is_connected() {
            let jitter = rng.gen_range(-2..=2);
            ctl.set_rssi((ctl.current_rssi() + jitter).clamp(-100, -30));
        }
        if let Some(session) = session {
            if phase_started.elapsed() >= session {
                if ctl.is_connected() {
                    info!("receiver leaving");
                    ctl.disconnect();
                } else {
                    info!("receiver coming back");
                    ctl.connect(rssi);
                }
                phase_started = Instant::now();
            }
        }
    }
    ctl.disconnect();
}

fn run(args: BadgeArgs) -> Result<(), BadgeError> {
    let config = match &args.config {
        Some(path) => BadgeConfig::load(path)?,
        None => BadgeConfig::default(),
    };
    let config = args.apply(config);

    let microphone = match &args.wav {
        Some(path) => SimMicrophone::from_wav(path)?,
        None => SimMicrophone::noise(args.noise),
    };
    let imu = SimMotion::new(args.seed, 0.02).ready_chance(0.9);
    let gsr = config
        .conductance_enabled
        .then(|| SimConductance::drifting(args.seed, 600, 40));

    let mut radio = SimRadio::new();
    let ctl = radio.controller();
    let records = radio.subscribe();

    let mut badge = Badge::start(&config, radio, microphone, imu, gsr, SpinDelay)?;

    let printer = spawn(move || {
        let stdout = io::stdout();
        for record in records {
            let mut out = stdout.lock();
            // A closed pipe just means nobody is listening any more.
            if writeln!(out, "{}", record).and_then(|_| out.flush()).is_err() {
                break;
            }
        }
    });

    let stop = Arc::new(AtomicBool::new(false));
    let peer = {
        let stop = Arc::clone(&stop);
        let session = args.session_secs.map(Duration::from_secs);
        let duration = args.duration_secs.map(Duration::from_secs);
        let rssi = args.rssi;
        spawn(move || simulate_peer(ctl, rssi, session, duration, stop))
    };

    badge.run_until(&stop);
    drop(badge);

    let _ = peer.join();
    let _ = printer.join();
    Ok(())
}

fn main() {
    env_logger::init();
    let args = BadgeArgs::parse();

    if let Err(e) = run(args) {
        error!("{}", e);
        eprintln!("badge halted: {}", e);
        process::exit(1);
    }
}
