//! The error type shared by the badge core, its configuration loader, and
//! the host-side receiver.

use std::{borrow::Cow, fmt};

/// Which part of the badge failed to come up. Used by [BadgeError::Init].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// The wireless stack
    Radio,
    /// The microphone capture source
    Microphone,
    /// The accelerometer
    Motion,
    /// The skin-conductance sensor and its power rail
    Conductance,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Subsystem::Radio => "radio",
            Subsystem::Microphone => "microphone",
            Subsystem::Motion => "motion sensor",
            Subsystem::Conductance => "conductance sensor",
        };
        write!(f, "{}", name)
    }
}

/// Everything that can go wrong while bringing a badge up, loading its
/// configuration, or decoding what it sends.
#[derive(Debug)]
pub enum BadgeError {
    /// A peripheral or the radio stack failed to start. This is fatal, the
    /// badge never runs with a missing subsystem since the record is
    /// fixed-arity.
    Init {
        /// The subsystem that failed
        subsystem: Subsystem,
        /// Whatever the driver told us
        reason: String,
    },

    /// Returned when io fails when reading or writing files or ports.
    IoError(std::io::Error),

    /// Returned when serialization of a config fails.
    RonError(ron::Error),

    /// Returned when deserialization of a config fails.
    RonSpannedError(ron::de::SpannedError),

    /// Returned when a WAV file cannot be used as microphone input.
    HoundError(hound::Error),

    /// Returned when a CSV file cannot be written or read back.
    CsvError(csv::Error),

    /// Returned when a line received from a badge is not a valid record.
    Decode(String),
}

impl BadgeError {
    /// Shorthand for building an [BadgeError::Init].
    pub fn init(subsystem: Subsystem, reason: impl Into<String>) -> Self {
        BadgeError::Init {
            subsystem,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for BadgeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use BadgeError as BE;
        let msg = match self {
            BE::Init { subsystem, reason } => {
                Cow::from(format!("failed to start {}: {}", subsystem, reason))
            }
            BE::IoError(error) => Cow::from(format!("io error: {}", error)),
            BE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            BE::RonSpannedError(error) => Cow::from(format!("ron spanning error: {}", error)),
            BE::HoundError(error) => Cow::from(format!("wav error: {}", error)),
            BE::CsvError(error) => Cow::from(format!("csv error: {}", error)),
            BE::Decode(line) => Cow::from(format!("not a badge record: {:?}", line)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for BadgeError {}

impl From<std::io::Error> for BadgeError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<ron::Error> for BadgeError {
    fn from(value: ron::Error) -> Self {
        Self::RonError(value)
    }
}

impl From<ron::de::SpannedError> for BadgeError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

impl From<hound::Error> for BadgeError {
    fn from(value: hound::Error) -> Self {
        Self::HoundError(value)
    }
}

impl From<csv::Error> for BadgeError {
    fn from(value: csv::Error) -> Self {
        Self::CsvError(value)
    }
}
