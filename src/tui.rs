//! Terminal setup and rendering.
//!
//! One tab per service in the header row, the focused service's log
//! viewport in the middle, and a status bar at the bottom. Raw mode and the
//! alternate screen are entered on startup and restored on the way out.

use std::io::{self, Stdout};

use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::Paragraph;
use ratatui::Terminal;

use crate::service::ServiceState;
use crate::supervisor::Supervisor;

pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Diagnostic overlays toggled from the command line.
pub struct DebugOverlay {
    pub keyboard: bool,
    pub scroll: bool,
    pub last_key: Option<String>,
}

/// Enables raw mode, enters the alternate screen, and builds the terminal.
pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    Terminal::new(CrosstermBackend::new(stdout))
}

/// Restores the terminal to its original state.
pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Draws the whole frame: header tabs, focused log viewport, status bar,
/// and any debug overlays.
pub fn draw(
    terminal: &mut TuiTerminal,
    supervisor: &mut Supervisor,
    active: usize,
    context_name: &str,
    debug: &DebugOverlay,
) -> io::Result<()> {
    terminal.draw(|frame| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(1),
                Constraint::Length(1),
            ])
            .split(frame.area());

        frame.render_widget(Paragraph::new(header_line(supervisor, active)), chunks[0]);

        let footer = footer_line(supervisor, active, context_name);
        let log_area = chunks[1];
        let scroll_debug = debug.scroll.then(|| {
            supervisor.service(active).log.debug_lines()
        });

        let view = &mut supervisor.service_mut(active).log;
        let (width, height) = (log_area.width as usize, log_area.height as usize);
        if view.size() != (width, height) {
            view.set_size(width, height);
        }
        let lines: Vec<Line> = view.visible_lines().to_vec();
        frame.render_widget(Paragraph::new(Text::from(lines)), log_area);

        frame.render_widget(Paragraph::new(footer), chunks[2]);

        if let Some(lines) = scroll_debug {
            render_overlay(frame, log_area, &lines);
        }
        if debug.keyboard {
            if let Some(last_key) = &debug.last_key {
                render_overlay(
                    frame,
                    Rect {
                        y: log_area.y + log_area.height.saturating_sub(1),
                        height: 1,
                        ..log_area
                    },
                    &[format!("key: {last_key}")],
                );
            }
        }
    })?;
    Ok(())
}

fn header_line(supervisor: &Supervisor, active: usize) -> Line<'static> {
    let mut spans = Vec::new();
    for (index, service) in supervisor.services().iter().enumerate() {
        let tab_style = if index == active {
            Style::default()
                .fg(Color::White)
                .bg(Color::Blue)
                .add_modifier(Modifier::BOLD)
        } else if index % 2 == 0 {
            Style::default().fg(Color::Gray).bg(Color::DarkGray)
        } else {
            Style::default().fg(Color::Gray).bg(Color::Black)
        };
        let state_style = tab_style.fg(match service.state {
            ServiceState::Running => Color::Green,
            ServiceState::Starting | ServiceState::Stopping => Color::Yellow,
            ServiceState::Stopped => Color::Red,
        });
        spans.push(Span::styled(" ", tab_style));
        spans.push(Span::styled("●", state_style));
        spans.push(Span::styled(format!(" {} ", service.name), tab_style));
    }
    Line::from(spans)
}

fn footer_line(supervisor: &Supervisor, active: usize, context_name: &str) -> Line<'static> {
    let service = supervisor.service(active);
    let pid = match service.pid() {
        0 => "-".to_string(),
        pid => pid.to_string(),
    };
    let items = [
        context_name.to_string(),
        format!(
            "{}/{} running",
            supervisor.running_count(),
            supervisor.len()
        ),
        format!("Log: {}", format_data_size(service.log.buffer().total_bytes())),
        format!("PID {pid}"),
    ];
    let backgrounds = [
        Color::Rgb(0x12, 0xaf, 0xe3),
        Color::Rgb(0x12, 0x8c, 0xe3),
        Color::Rgb(0x12, 0x62, 0xe3),
        Color::Rgb(0x12, 0x3c, 0xe3),
    ];
    let mut spans = Vec::with_capacity(items.len());
    for (item, background) in items.iter().zip(backgrounds) {
        spans.push(Span::styled(
            format!(" {item} "),
            Style::default()
                .fg(Color::Rgb(0xdd, 0xdd, 0xdd))
                .bg(background),
        ));
    }
    Line::from(spans)
}

fn render_overlay(frame: &mut ratatui::Frame, area: Rect, lines: &[String]) {
    let width = lines
        .iter()
        .map(|line| line.chars().count() as u16)
        .max()
        .unwrap_or(0)
        .min(area.width);
    let height = (lines.len() as u16).min(area.height);
    if width == 0 || height == 0 {
        return;
    }
    let overlay = Rect {
        x: area.x + area.width - width,
        y: area.y,
        width,
        height,
    };
    let text: Vec<Line> = lines
        .iter()
        .map(|line| Line::from(line.clone()))
        .collect();
    frame.render_widget(
        Paragraph::new(Text::from(text)).style(Style::default().fg(Color::Black).bg(Color::Yellow)),
        overlay,
    );
}

/// Human-readable byte count: 1024 multiplier, up to three decimals with
/// trailing zeros trimmed.
pub fn format_data_size(bytes: usize) -> String {
    const UNITS: &[u8] = b"BKMGTPE";
    let mut size = bytes as f32;
    let mut unit = 0;
    while size / 1024.0 >= 1.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    let formatted = format!("{size:.3}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", trimmed, UNITS[unit] as char)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_data_size_picks_unit() {
        assert_eq!(format_data_size(0), "0B");
        assert_eq!(format_data_size(512), "512B");
        assert_eq!(format_data_size(1024), "1K");
        assert_eq!(format_data_size(10 * 1024 * 1024), "10M");
    }

    #[test]
    fn format_data_size_trims_trailing_zeros() {
        assert_eq!(format_data_size(1536), "1.5K");
        assert_eq!(format_data_size(1024 * 1024 + 512 * 1024), "1.5M");
    }
}
