use std::{
    io::{self, stdout},
    path::PathBuf,
};

use crate::{gui::error::GuiError, receiver::looks_like_badge};

use crossterm::{
    event::{self, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

/// Puts probable badges first, keeping the original order otherwise.
fn badges_first(mut ports: Vec<PathBuf>) -> Vec<PathBuf> {
    ports.sort_by_key(|p| !looks_like_badge(&p.to_string_lossy()));
    ports
}

/// Lets the user pick one of `available_ports`. Ports that look like a badge
/// adapter are listed first and highlighted. Returns `None` if the user
/// quits without choosing.
pub fn device_selector(available_ports: Vec<PathBuf>) -> Result<Option<PathBuf>, GuiError> {
    if available_ports.is_empty() {
        return Err(GuiError::NoDevices);
    }
    let mut available_ports = badges_first(available_ports);

    enable_raw_mode()?;
    let selected = run_then_restore(
        || {
            stdout().execute(EnterAlternateScreen)?;
            pick(&available_ports)
        },
        || {
            disable_raw_mode()?;
            stdout().execute(LeaveAlternateScreen)?;
            Ok(())
        },
    )?;

    Ok(selected.map(|i| available_ports.swap_remove(i)))
}

/// Runs `body`, then `restore` no matter how `body` went. An error from
/// `body` wins over one from `restore`.
fn run_then_restore<T>(
    body: impl FnOnce() -> Result<T, GuiError>,
    restore: impl FnOnce() -> io::Result<()>,
) -> Result<T, GuiError> {
    let res = body();
    let restored = restore();
    let value = res?;
    restored?;
    Ok(value)
}

fn pick(ports: &[PathBuf]) -> Result<Option<usize>, GuiError> {
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let mut cursor = 0;
    let mut list_state = ListState::default().with_selected(Some(cursor));
    let n_ports = ports.len();
    let mut selected_port = None;
    loop {
        let title = Title::from(" Badge Selector ".magenta().bold());
        let instructions = Title::from(Line::from(vec![
            " Navigate ".into(),
            "<Up>/<Down>".magenta().bold(),
            " Select ".into(),
            "<Enter>".magenta().bold(),
            " Quit ".into(),
            "<Q> ".magenta().bold(),
        ]));
        let block = Block::default()
            .title(title.alignment(Alignment::Center))
            .title(
                instructions
                    .alignment(Alignment::Center)
                    .position(Position::Bottom),
            )
            .borders(Borders::ALL);
        let port_names = ports.iter().map(|p| {
            let name = p.to_string_lossy().into_owned();
            if looks_like_badge(&name) {
                ListItem::new(format!("{} (badge?)", name)).style(Style::default().fg(Color::Green))
            } else {
                ListItem::new(name)
            }
        });
        let list = List::new(port_names)
            .style(Style::default().fg(Color::White))
            .highlight_symbol(">>")
            .highlight_style(Style::default().fg(Color::Magenta))
            .block(block);
        list_state.select(Some(cursor));
        terminal.draw(|frame| {
            let area = frame.size();
            frame.render_stateful_widget(list, area, &mut list_state);
        })?;
        if event::poll(std::time::Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Down => {
                            cursor = (cursor + 1) % n_ports;
                        }
                        KeyCode::Up => {
                            cursor = (cursor + n_ports - 1) % n_ports;
                        }
                        KeyCode::Enter => {
                            selected_port = Some(cursor);
                            break;
                        }
                        KeyCode::Char('q') => break,
                        _ => {}
                    }
                }
            }
        }
    }

    Ok(selected_port)
}
