//! Summarizes a session file into fixed time windows per badge, for
//! analysis elsewhere.

use badgestream::{
    args::ProcessorArgs,
    processor::{self, ActivityLabel},
};
use chrono::{Duration, Local};
use clap::Parser;
use log::{error, info};
use std::{error::Error, process};

fn run(args: ProcessorArgs) -> Result<(), Box<dyn Error>> {
    let file = match args.file {
        Some(file) => file,
        None => processor::latest_session_file(&args.data_dir)?.ok_or_else(|| {
            format!("no session files in {}", args.data_dir.display())
        })?,
    };
    let loaded = processor::load_file(&file)?;

    let labels: Vec<ActivityLabel> = match &args.labels {
        Some(path) => processor::load_labels(path)?,
        None => {
            info!("No labels given, every window is {}", processor::UNKNOWN_LABEL);
            vec![]
        }
    };

    let windows = processor::process(
        &loaded.samples,
        Duration::seconds(args.window_secs as i64),
        &labels,
    );
    let now = Local::now().naive_local();
    let files = processor::export(&args.out_dir, &windows, &labels, now)?;
    print!(
        "{}",
        processor::summary(&windows, &labels, &files, now)
    );
    Ok(())
}

fn main() {
    env_logger::init();
    let args = ProcessorArgs::parse();

    if let Err(e) = run(args) {
        error!("{}", e);
        eprintln!("processor: {}", e);
        process::exit(1);
    }
}
