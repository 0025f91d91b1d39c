//! Listens to one or more badges, through serial adapters or on stdin, and
//! files everything they send in one CSV file.

use badgestream::{
    args::{BadgePort, ReceiverArgs},
    gui::{device_selector, live_view},
    receiver::{Collector, CsvLog, LineFramer},
};
use clap::Parser;
use log::{error, info, warn};
use serial2::SerialPort;
use std::{
    error::Error,
    fs::File,
    io::{self, ErrorKind, Read},
    process,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{spawn, JoinHandle},
    time::Duration,
};

type SharedCollector = Arc<Mutex<Collector<File>>>;

fn lock(c: &SharedCollector) -> MutexGuard<'_, Collector<File>> {
    c.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads `input` until it ends, feeding every complete line `badge` sends
/// to `collector`.
fn pump(badge: String, mut input: Box<dyn Read + Send>, collector: SharedCollector) {
    let mut buffer = [0; 256];
    let mut framer = LineFramer::new();

    loop {
        let read_len = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => continue,
            Err(e) => {
                warn!("{} disconnected: {}", badge, e);
                break;
            }
        };
        for line in framer.push(&buffer[..read_len]) {
            if let Err(e) = lock(&collector).handle_line(&badge, &line) {
                error!("Could not log {:?} from {}: {}", line, badge, e);
            }
        }
    }
    info!("{} stream ended", badge);
}

fn open_port(port: &BadgePort, baud: u32) -> Result<Box<dyn Read + Send>, Box<dyn Error>> {
    // Set the read timeout to infinity (well, about 584,942,417,355 years,
    // which is close enough)
    let mut serial = SerialPort::open(&port.path, baud)?;
    serial.set_read_timeout(Duration::MAX)?;
    info!(
        "Listening to {} on {} at {} baud",
        port.badge,
        port.path.display(),
        baud
    );
    Ok(Box::new(serial))
}

/// Every input to listen to, with the badge its lines are filed under.
fn open_inputs(args: &ReceiverArgs) -> Result<Vec<(String, Box<dyn Read + Send>)>, Box<dyn Error>> {
    if args.stdin {
        let stdin: Box<dyn Read + Send> = Box::new(io::stdin());
        return Ok(vec![(args.badge.clone(), stdin)]);
    }

    let ports = if args.ports.is_empty() {
        let path = device_selector(SerialPort::available_ports()?)?.ok_or("no device selected")?;
        vec![BadgePort {
            badge: args.badge.clone(),
            path,
        }]
    } else {
        args.ports.clone()
    };

    let mut inputs = Vec::with_capacity(ports.len());
    for port in &ports {
        inputs.push((port.badge.clone(), open_port(port, args.baud)?));
    }
    Ok(inputs)
}

fn run(args: ReceiverArgs) -> Result<(), Box<dyn Error>> {
    let inputs = open_inputs(&args)?;
    let (log, path) = CsvLog::create_in(&args.out_dir)?;
    let collector: SharedCollector = Arc::new(Mutex::new(Collector::new(log)));

    let pumps: Vec<JoinHandle<()>> = inputs
        .into_iter()
        .map(|(badge, input)| {
            let collector = Arc::clone(&collector);
            spawn(move || pump(badge, input, collector))
        })
        .collect();

    if args.live {
        let view_collector = Arc::clone(&collector);
        live_view(
            path.display().to_string(),
            Box::new(move || lock(&view_collector).snapshot()),
        )?;
    } else {
        for pump in pumps {
            if pump.join().is_err() {
                return Err("reader thread panicked".into());
            }
        }
    }

    let collector = lock(&collector);
    for badge in collector.badges() {
        info!("{}: {} records", badge, collector.received_from(badge));
    }
    info!(
        "{} records in total saved to {}",
        collector.received(),
        path.display()
    );
    Ok(())
}

fn main() {
    env_logger::init();
    let args = ReceiverArgs::parse();

    if let Err(e) = run(args) {
        error!("{}", e);
        eprintln!("receiver: {}", e);
        process::exit(1);
    }
}
