//! The host side of the link: turn the byte streams coming off the badges
//! into [Record]s, and keep every one of them in a CSV file.
//!
//! All badges of a session share one file, `AllBadges_data_<start time>.csv`,
//! with the columns
//!
//! ```text
//! Timestamp,Badge_Name,Sound_Level,RSSI,Acceleration,Raw_Data
//! ```
//!
//! A line that is not a valid record is still kept, with `N/A` in the value
//! columns, since a badge sending garbage is worth knowing about.

use crate::{error::BadgeError, record::Record};
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, VecDeque},
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

/// Substrings that give away a badge among other devices.
pub const BADGE_NAME_PATTERNS: [&str; 4] = ["badge", "arduino", "esp32", "sensor"];

/// The CSV header row.
pub const CSV_COLUMNS: [&str; 6] = [
    "Timestamp",
    "Badge_Name",
    "Sound_Level",
    "RSSI",
    "Acceleration",
    "Raw_Data",
];

/// How timestamps are written to the `Timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Value columns of a line that did not decode.
pub const NOT_AVAILABLE: &str = "N/A";

/// How many records [Collector::history] keeps around per badge.
pub const HISTORY_LEN: usize = 200;

/// Longest line [LineFramer] waits for before giving up on it.
pub const MAX_LINE_LEN: usize = 1024;

/// Whether a device name looks like one of ours.
pub fn looks_like_badge(name: &str) -> bool {
    let name = name.to_lowercase();
    BADGE_NAME_PATTERNS.iter().any(|p| name.contains(p))
}

/// Splits a byte stream into lines. Bytes are held until their newline
/// shows up, up to [MAX_LINE_LEN] of them.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
    overflowed: bool,
}

impl LineFramer {
    /// Instantiates an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `bytes` in and returns every line they complete, without its
    /// terminator. Lines that are not UTF-8 are dropped with a warning,
    /// which mostly happens with leftovers in the adapter's buffer when a
    /// port is first opened. So is a line that runs past [MAX_LINE_LEN],
    /// up to and including its newline.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &c in bytes {
            if c != b'\n' {
                if self.overflowed {
                    continue;
                }
                if self.pending.len() == MAX_LINE_LEN {
                    warn!(
                        "No line break in {} bytes, dropping them (wrong baud rate?)",
                        MAX_LINE_LEN
                    );
                    self.pending.clear();
                    self.overflowed = true;
                    continue;
                }
                self.pending.push(c);
                continue;
            }
            if std::mem::take(&mut self.overflowed) {
                continue;
            }
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    let s = s.trim_end_matches('\r');
                    if !s.is_empty() {
                        lines.push(s.to_owned());
                    }
                }
                Err(e) => warn!("Failed to decode utf-8: {:?}", e),
            }
            self.pending.clear();
        }
        lines
    }
}

/// One row of the CSV file, as text. Value columns hold the wire rendering
/// of the record, or `N/A`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CsvRow {
    /// Receive time, formatted with [TIMESTAMP_FORMAT]
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    /// Which badge sent it
    #[serde(rename = "Badge_Name")]
    pub badge_name: String,
    /// Sound power, `-1` when there was no audio
    #[serde(rename = "Sound_Level")]
    pub sound_level: String,
    /// Signal strength in dBm
    #[serde(rename = "RSSI")]
    pub rssi: String,
    /// Motion intensity, `-1.000` when there was no reading
    #[serde(rename = "Acceleration")]
    pub acceleration: String,
    /// The line as received
    #[serde(rename = "Raw_Data")]
    pub raw_data: String,
}

/// One received line, as it goes into the CSV file.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// When the line arrived
    pub timestamp: DateTime<Local>,
    /// Which badge sent it
    pub badge: String,
    /// The line as received
    pub raw: String,
    /// The line decoded, if it was a valid record
    pub record: Option<Record>,
}

impl Reading {
    /// The CSV row for this reading.
    pub fn to_row(&self) -> CsvRow {
        let (sound, rssi, motion) = match &self.record {
            Some(r) => {
                // Reuse the wire rendering so the file matches what was sent.
                let wire = r.to_string();
                let mut fields = wire.split(',').map(String::from);
                (
                    fields.next().unwrap_or_default(),
                    fields.next().unwrap_or_default(),
                    fields.next().unwrap_or_default(),
                )
            }
            None => (
                NOT_AVAILABLE.to_owned(),
                NOT_AVAILABLE.to_owned(),
                NOT_AVAILABLE.to_owned(),
            ),
        };
        CsvRow {
            timestamp: self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            badge_name: self.badge.clone(),
            sound_level: sound,
            rssi,
            acceleration: motion,
            raw_data: self.raw.clone(),
        }
    }
}

/// An append-only CSV log of [Reading]s.
pub struct CsvLog<W: Write> {
    out: csv::Writer<W>,
}

impl<W: Write> CsvLog<W> {
    /// Writes the header to `out` and returns a log appending to it.
    pub fn new(out: W) -> Result<Self, BadgeError> {
        let mut out = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(out);
        out.write_record(CSV_COLUMNS)?;
        out.flush()?;
        Ok(Self { out })
    }

    /// Appends one row. Flushed straight away so the file can be followed
    /// while a session is running.
    pub fn append(&mut self, reading: &Reading) -> Result<(), BadgeError> {
        self.out.serialize(reading.to_row())?;
        self.out.flush()?;
        Ok(())
    }

    /// Gives back the underlying writer.
    pub fn into_inner(self) -> Result<W, BadgeError> {
        self.out
            .into_inner()
            .map_err(|e| BadgeError::IoError(e.into_error()))
    }
}

impl CsvLog<File> {
    /// Creates `dir` if needed and a fresh session file in it, named after
    /// the current time. Returns the log and the file's path.
    pub fn create_in(dir: impl AsRef<Path>) -> Result<(Self, PathBuf), BadgeError> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self::create_stamped(dir.as_ref(), &stamp)
    }

    /// Never opens an existing file: if the name for `stamp` is taken, a
    /// counter is appended until one is free.
    fn create_stamped(dir: &Path, stamp: &str) -> Result<(Self, PathBuf), BadgeError> {
        fs::create_dir_all(dir)?;
        let mut attempt = 0u32;
        loop {
            let name = match attempt {
                0 => format!("AllBadges_data_{}.csv", stamp),
                n => format!("AllBadges_data_{}_{}.csv", stamp, n),
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    let log = Self::new(file)?;
                    info!("Created unified CSV file: {}", path.display());
                    return Ok((log, path));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("{} is taken", path.display());
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[derive(Debug, Default)]
struct Feed {
    received: usize,
    history: VecDeque<Record>,
}

/// Collects the lines from every badge of a session: decodes them, logs
/// them to the one shared file, and keeps the latest few per badge for
/// display.
pub struct Collector<W: Write> {
    log: CsvLog<W>,
    feeds: BTreeMap<String, Feed>,
}

impl<W: Write> Collector<W> {
    /// Instantiates a collector writing to `log`.
    pub fn new(log: CsvLog<W>) -> Self {
        Self {
            log,
            feeds: BTreeMap::new(),
        }
    }

    /// Handles one line `badge` sent, received now.
    pub fn handle_line(&mut self, badge: &str, line: &str) -> Result<Option<Record>, BadgeError> {
        self.handle_line_at(badge, line, Local::now())
    }

    /// Handles one line `badge` sent, received at `timestamp`. Returns the
    /// decoded record, or `None` if the line was not one (it is logged
    /// either way).
    pub fn handle_line_at(
        &mut self,
        badge: &str,
        line: &str,
        timestamp: DateTime<Local>,
    ) -> Result<Option<Record>, BadgeError> {
        let record = match line.parse::<Record>() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("{}: {}", badge, e);
                None
            }
        };
        let reading = Reading {
            timestamp,
            badge: badge.to_owned(),
            raw: line.trim().to_owned(),
            record,
        };
        self.log.append(&reading)?;

        let feed = self.feeds.entry(reading.badge).or_default();
        if let Some(record) = record {
            feed.received += 1;
            if feed.history.len() == HISTORY_LEN {
                feed.history.pop_front();
            }
            feed.history.push_back(record);
            if feed.received % 10 == 0 {
                info!("#{} - {}: {}", feed.received, badge, reading.raw);
            } else {
                debug!("{}: {}", badge, reading.raw);
            }
        }
        Ok(record)
    }

    /// How many valid records came in so far, from all badges.
    pub fn received(&self) -> usize {
        self.feeds.values().map(|f| f.received).sum()
    }

    /// How many valid records `badge` sent so far.
    pub fn received_from(&self, badge: &str) -> usize {
        self.feeds.get(badge).map_or(0, |f| f.received)
    }

    /// Every badge heard from, in name order.
    pub fn badges(&self) -> impl Iterator<Item = &str> {
        self.feeds.keys().map(String::as_str)
    }

    /// The most recent records from `badge`, oldest first.
    pub fn history(&self, badge: &str) -> Option<&VecDeque<Record>> {
        self.feeds.get(badge).map(|f| &f.history)
    }

    /// A copy of every badge's history, for drawing.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<Record>> {
        self.feeds
            .iter()
            .map(|(badge, f)| (badge.clone(), f.history.iter().copied().collect()))
            .collect()
    }

    /// Finishes the session and gives back the log.
    pub fn into_log(self) -> CsvLog<W> {
        self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 1, 12, 30, 5)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(ms as i64))
            .unwrap()
    }

    fn collector() -> Collector<Vec<u8>> {
        Collector::new(CsvLog::new(Vec::new()).unwrap())
    }

    fn rows(c: Collector<Vec<u8>>) -> Vec<String> {
        let bytes = c.into_log().into_inner().unwrap();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    fn header() -> String {
        CSV_COLUMNS.join(",")
    }

    #[test]
    fn recognises_badge_names() {
        assert!(looks_like_badge("Badge06"));
        assert!(looks_like_badge("/dev/serial/by-id/usb-Arduino_Nano_33_BLE-if00"));
        assert!(looks_like_badge("ESP32-S3"));
        assert!(!looks_like_badge("/dev/ttyS0"));
    }

    #[test]
    fn frames_lines_across_reads() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"142,-61,0.0").is_empty());
        assert_eq!(
            framer.push(b"87\r\n3,-60,0.001\n\n4,"),
            vec!["142,-61,0.087".to_owned(), "3,-60,0.001".to_owned()]
        );
        assert_eq!(framer.push(b"-59,0.000\n"), vec!["4,-59,0.000".to_owned()]);
    }

    #[test]
    fn drops_invalid_utf8_lines() {
        let mut framer = LineFramer::new();
        assert_eq!(
            framer.push(b"\xff\xfe\n1,-1,1.000\n"),
            vec!["1,-1,1.000".to_owned()]
        );
    }

    #[test]
    fn runaway_lines_are_dropped() {
        let mut framer = LineFramer::new();
        for _ in 0..4 {
            assert!(framer.push(&[b'x'; 700]).is_empty());
            assert!(framer.pending.len() <= MAX_LINE_LEN);
        }
        // The tail of the runaway line goes too, framing resumes after it.
        assert_eq!(
            framer.push(b"tail\n1,-1,1.000\n"),
            vec!["1,-1,1.000".to_owned()]
        );
    }

    #[test]
    fn logs_records_and_garbage() {
        let mut c = collector();
        let r = c.handle_line_at("Badge04", "142,-61,0.087", at(7)).unwrap();
        assert_eq!(r.map(|r| r.rssi), Some(-61));
        assert_eq!(
            c.handle_line_at("Badge04", "hello, \"world\"", at(8)).unwrap(),
            None
        );
        assert_eq!(c.received(), 1);
        assert_eq!(
            rows(c),
            vec![
                header(),
                "2024-03-01 12:30:05.007,Badge04,142,-61,0.087,\"142,-61,0.087\"".to_owned(),
                "2024-03-01 12:30:05.008,Badge04,N/A,N/A,N/A,\"hello, \"\"world\"\"\"".to_owned(),
            ]
        );
    }

    #[test]
    fn four_field_records_keep_the_raw_line() {
        let mut c = collector();
        c.handle_line_at("Badge04", "-1,-61,-1.000,173", at(0)).unwrap();
        assert_eq!(
            rows(c)[1],
            "2024-03-01 12:30:05.000,Badge04,-1,-61,-1.000,\"-1,-61,-1.000,173\""
        );
    }

    #[test]
    fn badges_share_the_log_but_not_the_history() {
        let mut c = collector();
        c.handle_line_at("Badge06", "9,-70,0.900", at(0)).unwrap();
        c.handle_line_at("Badge01", "1,-50,0.100", at(1)).unwrap();
        c.handle_line_at("Badge01", "2,-51,0.200", at(2)).unwrap();
        c.handle_line_at("Badge06", "garbage", at(3)).unwrap();

        assert_eq!(c.badges().collect::<Vec<_>>(), vec!["Badge01", "Badge06"]);
        assert_eq!(c.received(), 3);
        assert_eq!(c.received_from("Badge01"), 2);
        assert_eq!(c.received_from("Badge06"), 1);
        assert_eq!(c.received_from("Badge02"), 0);
        assert_eq!(c.history("Badge06").unwrap().len(), 1);
        assert!(c.history("Badge02").is_none());

        let snapshot = c.snapshot();
        assert_eq!(snapshot["Badge01"][1].sound_power, Some(2));

        let rows = rows(c);
        assert_eq!(rows.len(), 5);
        assert!(rows[1].contains(",Badge06,9,-70,0.900,"));
        assert!(rows[3].contains(",Badge01,2,-51,0.200,"));
    }

    #[test]
    fn history_is_bounded() {
        let mut c = collector();
        for i in 0..(HISTORY_LEN + 5) {
            c.handle_line_at("Badge04", &format!("{},-50,0.100", i), at(0))
                .unwrap();
        }
        let history = c.history("Badge04").unwrap();
        assert_eq!(history.len(), HISTORY_LEN);
        assert_eq!(history.front().unwrap().sound_power, Some(5));
    }

    #[test]
    fn session_file_gets_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let (log, path) = CsvLog::create_in(dir.path().join("badge_data")).unwrap();
        drop(log);
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, format!("{}\n", header()));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("AllBadges_data_"));
    }

    #[test]
    fn sessions_started_together_never_clobber_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let (first, first_path) = CsvLog::create_stamped(dir.path(), "20240301_123005").unwrap();
        let mut first = Collector::new(first);
        first.handle_line_at("Badge01", "1,-50,0.100", at(0)).unwrap();
        first.handle_line_at("Badge01", "2,-51,0.200", at(1)).unwrap();

        let (second, second_path) = CsvLog::create_stamped(dir.path(), "20240301_123005").unwrap();
        let mut second = Collector::new(second);
        second.handle_line_at("Badge06", "9,-70,0.900", at(2)).unwrap();

        assert_ne!(first_path, second_path);
        assert!(second_path.ends_with("AllBadges_data_20240301_123005_1.csv"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);

        let first_text = fs::read_to_string(&first_path).unwrap();
        assert_eq!(first_text.lines().count(), 3);
        assert!(first_text.contains("Badge01,2,-51,0.200"));
        let second_text = fs::read_to_string(&second_path).unwrap();
        assert_eq!(second_text.lines().count(), 2);
        assert!(second_text.contains("Badge06,9,-70,0.900"));
    }

    #[test]
    fn rows_read_back_by_column_name() {
        let mut c = collector();
        c.handle_line_at("Badge04", "142,-61,0.087", at(7)).unwrap();
        let bytes = c.into_log().into_inner().unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let row: CsvRow = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(row.badge_name, "Badge04");
        assert_eq!(row.sound_level, "142");
        assert_eq!(row.raw_data, "142,-61,0.087");
    }
}
