use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    symbols,
    text::Span,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType},
    Frame, Terminal,
};
use std::{
    collections::BTreeMap,
    io,
    time::{Duration, Instant},
};

use crate::{gui::error::GuiError, record::Record};

/// Hands the view the most recent records of every badge, oldest first,
/// each time it redraws.
pub type RecordSource = Box<dyn FnMut() -> BTreeMap<String, Vec<Record>>>;

/// Line colors, handed out to badges in name order.
const PALETTE: [Color; 8] = [
    Color::Cyan,
    Color::Yellow,
    Color::Red,
    Color::Green,
    Color::Magenta,
    Color::LightBlue,
    Color::LightRed,
    Color::White,
];

type Points = Vec<(f64, f64)>;

#[derive(Default)]
struct Trace {
    shown: bool,
    sound: Points,
    rssi: Points,
    motion: Points,
}

struct App {
    title: String,
    source: RecordSource,
    traces: BTreeMap<String, Trace>,
}

impl App {
    fn on_tick(&mut self) {
        for (badge, records) in (self.source)() {
            let trace = self.traces.entry(badge).or_insert_with(|| Trace {
                shown: true,
                ..Trace::default()
            });
            trace.sound = series(&records, |r| r.sound_power.map(|p| p as f64));
            trace.rssi = series(&records, |r| Some(r.rssi as f64));
            trace.motion = series(&records, |r| r.motion.map(|m| m as f64));
        }
    }

    /// Handles a key press. Returns false when the view should close.
    fn on_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Char('a') => self.traces.values_mut().for_each(|t| t.shown = true),
            KeyCode::Char('n') => self.traces.values_mut().for_each(|t| t.shown = false),
            KeyCode::Char(c) => {
                if let Some(trace) = c
                    .to_digit(10)
                    .filter(|&d| d > 0)
                    .and_then(|d| self.traces.values_mut().nth(d as usize - 1))
                {
                    trace.shown = !trace.shown;
                }
            }
            _ => {}
        }
        true
    }
}

/// Plots one field of `records` against its position, skipping records
/// where the field has no data.
fn series(records: &[Record], field: impl Fn(&Record) -> Option<f64>) -> Points {
    records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| field(r).map(|v| (i as f64, v)))
        .collect()
}

/// Y bounds that fit every point, with a little room. A flat series gets a
/// band of one unit around it so it does not sit on the border.
fn bounds<'a>(points: impl Iterator<Item = &'a (f64, f64)> + Clone) -> [f64; 2] {
    let lo = points.clone().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let hi = points.map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    if !lo.is_finite() || !hi.is_finite() {
        return [0.0, 1.0];
    }
    if hi - lo < f64::EPSILON {
        return [lo - 1.0, hi + 1.0];
    }
    let pad = (hi - lo) * 0.05;
    [lo - pad, hi + pad]
}

/// Shows a live chart of sound power, RSSI and motion, one line per badge,
/// for the records `source` hands over. `1`-`9` toggle a badge, `a` shows
/// all of them, `n` hides all of them, and `q` or `Esc` closes the view.
pub fn live_view(title: impl Into<String>, source: RecordSource) -> Result<(), GuiError> {
    // setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    if let Err(e) = execute!(stdout, EnterAlternateScreen) {
        disable_raw_mode()?;
        return Err(e.into());
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let tick_rate = Duration::from_millis(250);
    let app = App {
        title: title.into(),
        source,
        traces: BTreeMap::new(),
    };
    let res = run_app(&mut terminal, app, tick_rate);

    // restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(res?)
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    tick_rate: Duration,
) -> io::Result<()> {
    let mut last_tick = Instant::now();
    app.on_tick();
    loop {
        terminal.draw(|f| ui(f, &app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && !app.on_key(key.code) {
                    return Ok(());
                }
            }
        }
        if last_tick.elapsed() >= tick_rate {
            app.on_tick();
            last_tick = Instant::now();
        }
    }
}

fn chart(f: &mut Frame, area: Rect, name: &str, lines: Vec<(&str, Color, &Points)>) {
    let [lo, hi] = bounds(lines.iter().flat_map(|l| l.2.iter()));
    let width = lines
        .iter()
        .filter_map(|l| l.2.last().map(|p| p.0))
        .fold(1.0, f64::max);
    let datasets: Vec<Dataset> = lines
        .into_iter()
        .map(|(badge, color, points)| {
            Dataset::default()
                .name(badge.to_owned())
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(color))
                .data(points)
        })
        .collect();
    let chart = Chart::new(datasets)
        .block(Block::default().title(name.to_owned()).borders(Borders::ALL))
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::White))
                .bounds([0.0, width]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::White))
                .bounds([lo, hi])
                .labels(vec![
                    Span::from(format!("{:.1}", lo)),
                    Span::from(format!("{:.1}", hi)),
                ]),
        );
    f.render_widget(chart, area);
}

fn ui(f: &mut Frame, app: &App) {
    let legend = app
        .traces
        .iter()
        .enumerate()
        .map(|(i, (badge, t))| {
            let mark = if t.shown { "x" } else { " " };
            format!("[{}] {} {}", mark, i + 1, badge)
        })
        .collect::<Vec<_>>()
        .join("  ");
    let outer = Block::default()
        .title(format!(
            " {} | {} | 1-9 toggle, a all, n none, q quit ",
            app.title, legend
        ))
        .borders(Borders::NONE);
    let inner = outer.inner(f.size());
    f.render_widget(outer, f.size());

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(inner);

    let shown = || {
        app.traces
            .iter()
            .zip(PALETTE.iter().cycle())
            .filter(|((_, t), _)| t.shown)
            .map(|((badge, t), &color)| (badge.as_str(), color, t))
    };
    chart(f, rows[0], "Sound", shown().map(|(b, c, t)| (b, c, &t.sound)).collect());
    chart(f, rows[1], "RSSI", shown().map(|(b, c, t)| (b, c, &t.rssi)).collect());
    chart(f, rows[2], "Motion", shown().map(|(b, c, t)| (b, c, &t.motion)).collect());
}
