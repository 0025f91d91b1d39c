//! The text record a badge sends every cycle, and its parser.
//!
//! On the wire a record is a comma-separated line with no trailing comma:
//!
//! ```text
//! <sound power>,<rssi>,<motion intensity>[,<skin conductance>]
//! ```
//!
//! e.g. `142,-61,0.087` or `142,-61,0.087,173`. Motion intensity always has
//! three decimals. The conductance field only exists on badges with that
//! sensor fitted, the receiver tells the two variants apart by field count.
//!
//! A cycle with no new audio or no new accelerometer reading sends the
//! [NO_DATA] sentinel in that field (`-1` for sound, `-1.000` for motion).
//! Neither value can come out of a real measurement. The old firmware sent
//! whatever happened to be left in memory instead.

use crate::error::BadgeError;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, i16, u64, u8},
    combinator::{all_consuming, map, opt, value},
    number::complete::float,
    sequence::{preceded, tuple},
    Finish, IResult,
};
use std::{fmt, str::FromStr};

/// Sent in place of a field that has no new data this cycle.
pub const NO_DATA: i64 = -1;

/// One cycle's worth of readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    /// Mean-square microphone power, `None` if no audio was captured
    pub sound_power: Option<u64>,
    /// Link signal strength, as reported by the stack
    pub rssi: i16,
    /// Summed per-axis acceleration change, `None` if no new reading
    pub motion: Option<f32>,
    /// Skin conductance on 0..=255, `None` on badges without the sensor
    pub conductance: Option<u8>,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sound_power {
            Some(power) => write!(f, "{}", power)?,
            None => write!(f, "{}", NO_DATA)?,
        }
        write!(f, ",{}", self.rssi)?;
        match self.motion {
            Some(motion) => write!(f, ",{:5.3}", motion)?,
            None => write!(f, ",{:5.3}", NO_DATA as f32)?,
        }
        if let Some(gsr) = self.conductance {
            write!(f, ",{}", gsr)?;
        }
        Ok(())
    }
}

fn parse_sound(s: &str) -> IResult<&str, Option<u64>> {
    alt((value(None, tag("-1")), map(u64, Some)))(s)
}

fn parse_motion(s: &str) -> IResult<&str, Option<f32>> {
    alt((value(None, tag("-1.000")), map(float, Some)))(s)
}

fn parse_record(s: &str) -> IResult<&str, Record> {
    map(
        tuple((
            parse_sound,
            preceded(char(','), i16),
            preceded(char(','), parse_motion),
            opt(preceded(char(','), u8)),
        )),
        |(sound_power, rssi, motion, conductance)| Record {
            sound_power,
            rssi,
            motion,
            conductance,
        },
    )(s)
}

impl FromStr for Record {
    type Err = BadgeError;

    /// Parses one record. Surrounding whitespace (a line terminator, say)
    /// is ignored, anything else left over is an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        match all_consuming(parse_record)(line).finish() {
            Ok((_remaining, record)) => Ok(record),
            Err(_) => Err(BadgeError::Decode(line.to_owned())),
        }
    }
}
