//! A wearable sensor badge samples its microphone, accelerometer, radio
//! link strength and, on some builds, a skin-conductance sensor, and streams
//! one short text record per cycle to a paired receiver over a notification
//! characteristic.
//!
//! This crate is the badge's core and the host side that listens to it:
//!
//! - the feature extractors ([audio], [motion], [link_quality],
//!   [conductance]) and the [record] they are packed into,
//! - the [driver] that cycles them while a receiver is connected,
//! - the [peripherals] traits the core talks to hardware through, and a
//!   [sim]ulated set of that hardware to run it on a desktop,
//! - the [receiver] that frames, decodes and logs records to CSV, and a
//!   terminal [gui] to pick a port and watch the records live,
//! - the [processor] that summarizes a finished session for analysis.

#![warn(missing_docs)]
pub mod args;
pub mod audio;
pub mod conductance;
pub mod config;
pub mod driver;
pub mod error;
pub mod gui;
pub mod link_quality;
pub mod motion;
pub mod peripherals;
pub mod processor;
pub mod receiver;
pub mod record;
pub mod sample_buffer;
pub mod sim;
