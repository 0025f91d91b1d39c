//! Offline summaries of a session file: per badge, statistics of sound and
//! motion over fixed time windows, each window tagged with an activity
//! label, ready to be fed to other tools.

use crate::{
    error::BadgeError,
    receiver::{CsvRow, NOT_AVAILABLE},
};
use chrono::{Duration, NaiveDateTime};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
};

/// Window length used when none is asked for.
pub const DEFAULT_WINDOW_SECS: u64 = 20;

/// Label of a window no activity label covers.
pub const UNKNOWN_LABEL: &str = "unknown";

const PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// One row of a session file, with the values the statistics need.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// When the row was received
    pub timestamp: NaiveDateTime,
    /// Which badge sent it
    pub badge: String,
    /// Sound power, if the row had one
    pub sound: Option<f64>,
    /// Motion intensity, if the row had one
    pub motion: Option<f64>,
}

/// `N/A`, the no-data sentinels, and anything unreadable all mean there is
/// no value. Neither quantity can be negative.
fn value(field: &str) -> Option<f64> {
    let field = field.trim();
    if field == NOT_AVAILABLE {
        return None;
    }
    field.parse::<f64>().ok().filter(|v| *v >= 0.0)
}

impl Sample {
    /// Reads `row`. Returns `None` if its timestamp cannot be read.
    pub fn from_row(row: &CsvRow) -> Option<Self> {
        let timestamp = NaiveDateTime::parse_from_str(row.timestamp.trim(), PARSE_FORMAT).ok()?;
        Some(Self {
            timestamp,
            badge: row.badge_name.clone(),
            sound: value(&row.sound_level),
            motion: value(&row.acceleration),
        })
    }
}

/// What [load] made of a session file.
#[derive(Debug, Default)]
pub struct Loaded {
    /// Every usable row, in file order
    pub samples: Vec<Sample>,
    /// Rows dropped for being exact copies of an earlier one
    pub duplicates: usize,
    /// Rows dropped for an unreadable timestamp
    pub skipped: usize,
}

/// Reads a session file from `input`, dropping duplicate rows.
pub fn load<R: Read>(input: R) -> Result<Loaded, BadgeError> {
    let mut reader = csv::Reader::from_reader(input);
    let mut seen = HashSet::new();
    let mut loaded = Loaded::default();

    for row in reader.deserialize::<CsvRow>() {
        let row = row?;
        if !seen.insert(row.clone()) {
            loaded.duplicates += 1;
            continue;
        }
        match Sample::from_row(&row) {
            Some(sample) => loaded.samples.push(sample),
            None => {
                warn!("Skipping row with bad timestamp {:?}", row.timestamp);
                loaded.skipped += 1;
            }
        }
    }
    Ok(loaded)
}

/// Reads the session file at `path`, see [load].
pub fn load_file(path: impl AsRef<Path>) -> Result<Loaded, BadgeError> {
    let path = path.as_ref();
    let loaded = load(File::open(path)?)?;
    info!(
        "Loaded {} data points ({} duplicates removed) from {}",
        loaded.samples.len(),
        loaded.duplicates,
        path.display()
    );
    Ok(loaded)
}

/// The newest `AllBadges_data_*.csv` file in `dir`, going by its name.
pub fn latest_session_file(dir: impl AsRef<Path>) -> Result<Option<PathBuf>, BadgeError> {
    let mut newest: Option<(String, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with("AllBadges_data_") || !name.ends_with(".csv") {
            continue;
        }
        if newest.as_ref().map_or(true, |(n, _)| name > *n) {
            newest = Some((name, entry.path()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

/// A time period of one badge marked as some activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLabel {
    /// The badge it applies to
    pub badge: String,
    /// Start of the period, inclusive
    pub start: NaiveDateTime,
    /// End of the period, inclusive
    pub end: NaiveDateTime,
    /// What was going on, e.g. `active` or `not_active`
    pub label: String,
}

/// Reads activity labels from a RON file.
pub fn load_labels(path: impl AsRef<Path>) -> Result<Vec<ActivityLabel>, BadgeError> {
    Ok(ron::from_str(&fs::read_to_string(path)?)?)
}

/// Writes activity labels to a RON file.
pub fn save_labels(path: impl AsRef<Path>, labels: &[ActivityLabel]) -> Result<(), BadgeError> {
    let text = ron::ser::to_string_pretty(labels, ron::ser::PrettyConfig::default())?;
    fs::write(path, text)?;
    Ok(())
}

/// Minimum, maximum, mean and sample standard deviation of some values.
/// Each is `None` when there are too few values for it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stats {
    /// Smallest value
    pub min: Option<f64>,
    /// Largest value
    pub max: Option<f64>,
    /// Mean
    pub mean: Option<f64>,
    /// Standard deviation with `n - 1` in the denominator
    pub std: Option<f64>,
}

impl Stats {
    /// Statistics of `values`.
    pub fn of(values: impl IntoIterator<Item = f64>) -> Self {
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.len() > 1).then(|| {
            let sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (sq / (n - 1.0)).sqrt()
        });
        Self {
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            mean: Some(mean),
            std,
        }
    }
}

/// Statistics of one badge over one time window.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// Start of the window, inclusive
    pub start: NaiveDateTime,
    /// End of the window, exclusive
    pub end: NaiveDateTime,
    /// Midpoint of the window
    pub center: NaiveDateTime,
    /// The badge
    pub badge: String,
    /// How many rows fell in the window
    pub data_points: usize,
    /// Sound power
    pub sound: Stats,
    /// Motion intensity
    pub accel: Stats,
    /// The activity label covering the window start, or [UNKNOWN_LABEL]
    pub label: String,
}

/// Cuts one badge's `samples` into windows of `length`, the first starting
/// at the earliest sample, and summarizes every window that has any.
pub fn window_statistics(
    samples: &[Sample],
    length: Duration,
    labels: &[ActivityLabel],
) -> Vec<Window> {
    if length <= Duration::zero() {
        warn!("Window length must be positive, got {}", length);
        return vec![];
    }
    let mut sorted: Vec<&Sample> = samples.iter().collect();
    sorted.sort_by_key(|s| s.timestamp);
    let (Some(first), Some(last)) = (sorted.first(), sorted.last()) else {
        return vec![];
    };
    let badge = first.badge.clone();
    let last = last.timestamp;

    let mut windows = Vec::new();
    let mut rest = sorted.as_slice();
    let mut start = first.timestamp;
    while start < last {
        let end = start + length;
        let n = rest.iter().take_while(|s| s.timestamp < end).count();
        let (inside, after) = rest.split_at(n);
        rest = after;

        if !inside.is_empty() {
            let label = labels
                .iter()
                .find(|l| l.badge == badge && l.start <= start && start <= l.end)
                .map_or(UNKNOWN_LABEL, |l| l.label.as_str());
            windows.push(Window {
                start,
                end,
                center: start + length / 2,
                badge: badge.clone(),
                data_points: inside.len(),
                sound: Stats::of(inside.iter().filter_map(|s| s.sound)),
                accel: Stats::of(inside.iter().filter_map(|s| s.motion)),
                label: label.to_owned(),
            });
        }
        start = end;
    }
    windows
}

/// Runs [window_statistics] for every badge in `samples`, badges in the
/// order they first show up.
pub fn process(samples: &[Sample], length: Duration, labels: &[ActivityLabel]) -> Vec<Window> {
    let mut badges: Vec<&str> = Vec::new();
    for s in samples {
        if !badges.contains(&s.badge.as_str()) {
            badges.push(&s.badge);
        }
    }
    badges
        .into_iter()
        .flat_map(|badge| {
            info!("Processing {}...", badge);
            let own: Vec<Sample> = samples
                .iter()
                .filter(|s| s.badge == badge)
                .cloned()
                .collect();
            window_statistics(&own, length, labels)
        })
        .collect()
}

#[derive(Serialize)]
struct WindowRow<'a> {
    window_start: String,
    window_end: String,
    window_center: String,
    badge_name: &'a str,
    data_points: usize,
    sound_min: Option<f64>,
    sound_max: Option<f64>,
    sound_mean: Option<f64>,
    sound_std: Option<f64>,
    accel_min: Option<f64>,
    accel_max: Option<f64>,
    accel_mean: Option<f64>,
    accel_std: Option<f64>,
    activity_label: &'a str,
}

impl<'a> From<&'a Window> for WindowRow<'a> {
    fn from(w: &'a Window) -> Self {
        Self {
            window_start: w.start.format(OUTPUT_FORMAT).to_string(),
            window_end: w.end.format(OUTPUT_FORMAT).to_string(),
            window_center: w.center.format(OUTPUT_FORMAT).to_string(),
            badge_name: &w.badge,
            data_points: w.data_points,
            sound_min: w.sound.min,
            sound_max: w.sound.max,
            sound_mean: w.sound.mean,
            sound_std: w.sound.std,
            accel_min: w.accel.min,
            accel_max: w.accel.max,
            accel_mean: w.accel.mean,
            accel_std: w.accel.std,
            activity_label: &w.label,
        }
    }
}

/// Where one processing run puts its output.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFiles {
    /// `session_<stamp>`, holding the rest
    pub folder: PathBuf,
    /// The window statistics
    pub processed: PathBuf,
    /// The activity labels used
    pub labels: PathBuf,
    /// A human readable summary
    pub summary: PathBuf,
}

impl SessionFiles {
    fn new(out_dir: &Path, stamp: &str) -> Self {
        let folder = out_dir.join(format!("session_{}", stamp));
        Self {
            processed: folder.join(format!("processed_badge_data_{}.csv", stamp)),
            labels: folder.join(format!("data_labels_{}.ron", stamp)),
            summary: folder.join(format!("processing_summary_{}.txt", stamp)),
            folder,
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The summary text of a run that produced `windows` using `labels`.
pub fn summary(
    windows: &[Window],
    labels: &[ActivityLabel],
    files: &SessionFiles,
    generated: NaiveDateTime,
) -> String {
    let mut activity: BTreeMap<&str, usize> = BTreeMap::new();
    let mut points: BTreeMap<&str, usize> = BTreeMap::new();
    for w in windows {
        *activity.entry(&w.label).or_default() += 1;
        *points.entry(&w.badge).or_default() += w.data_points;
    }
    let mean_points = if windows.is_empty() {
        0.0
    } else {
        points.values().sum::<usize>() as f64 / windows.len() as f64
    };
    let activity = activity
        .iter()
        .map(|(label, n)| format!("{}: {}", label, n))
        .collect::<Vec<_>>()
        .join("\n");
    let per_badge = points
        .iter()
        .map(|(badge, n)| format!("{}: {}", badge, n))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Badge Data Processing Summary
Generated: {generated}

Processing Configuration:
- Total windows processed: {windows}
- Badges processed: {badges}
- Badge names: {names}
- Labels created: {labels}

Activity Distribution:
{activity}

Data Quality:
- Data points per badge: {per_badge}
- Average data points per window: {mean_points:.1}

Output Files:
- Processed data: {processed}
- Activity labels: {label_file}
- This summary: {summary}

Statistics Calculated:
For each time window, the following statistics were calculated:
- Sound Level: min, max, mean, standard deviation
- Acceleration: min, max, mean, standard deviation
- Activity Label: the label covering the window start, or unknown
",
        generated = generated.format("%Y-%m-%d %H:%M:%S"),
        windows = windows.len(),
        badges = points.len(),
        names = points.keys().copied().collect::<Vec<_>>().join(", "),
        labels = labels.len(),
        processed = file_name(&files.processed),
        label_file = file_name(&files.labels),
        summary = file_name(&files.summary),
    )
}

/// Writes `windows`, the `labels` they were tagged with, and a summary into
/// a new session folder under `out_dir`, stamped with `now`.
pub fn export(
    out_dir: impl AsRef<Path>,
    windows: &[Window],
    labels: &[ActivityLabel],
    now: NaiveDateTime,
) -> Result<SessionFiles, BadgeError> {
    let files = SessionFiles::new(out_dir.as_ref(), &now.format("%Y%m%d_%H%M%S").to_string());
    fs::create_dir_all(&files.folder)?;

    let mut out = csv::Writer::from_path(&files.processed)?;
    for w in windows {
        out.serialize(WindowRow::from(w))?;
    }
    out.flush()?;

    save_labels(&files.labels, labels)?;
    fs::write(&files.summary, summary(windows, labels, &files, now))?;
    info!("Processed data saved to {}", files.folder.display());
    Ok(files)
}
