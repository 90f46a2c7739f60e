use std::{io::Stdout, path::Path, process::Command};

use anyhow::{Context, Result};
use chrono::Local;
use crossterm::{
    ExecutableCommand,
    event::{self, Event, KeyEventKind},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};

use crate::{
    dashboard::{Action, Dashboard, DashboardFrame, Outcome, TotalsLine},
    pricing::ensure_override_file,
    session::SessionSource,
};

const MENU_WIDTH: u16 = 20;
const FALLBACK_EDITOR: &str = "vi";

type Term = Terminal<CrosstermBackend<Stdout>>;

/// Runs the dashboard until the user quits. The terminal is restored on every exit path.
pub fn run<S: SessionSource>(dashboard: &mut Dashboard<S>) -> Result<()> {
    let mut stdout = std::io::stdout();
    enable_raw_mode().context("enable raw mode")?;
    stdout
        .execute(EnterAlternateScreen)
        .context("enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("init terminal")?;
    terminal.clear().ok();
    terminal.hide_cursor().ok();

    let res = event_loop(&mut terminal, dashboard);

    disable_raw_mode().ok();
    let _ = terminal.backend_mut().execute(LeaveAlternateScreen);
    let _ = terminal.show_cursor();
    res
}

fn event_loop<S: SessionSource>(terminal: &mut Term, dashboard: &mut Dashboard<S>) -> Result<()> {
    loop {
        let height = terminal.size().context("terminal size")?.height as usize;
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let frame = dashboard.frame(height, &now);
        terminal.draw(|f| render(f, &frame))?;

        // Blocks until the next input; resizes fall through to a redraw.
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        let Some(action) = Action::from_key(key.code, dashboard.state().filter_menu_open) else {
            continue;
        };
        match dashboard.handle(action) {
            Outcome::Continue => {}
            Outcome::Quit => return Ok(()),
            Outcome::EditPricing => {
                let path = dashboard.pricing_path().to_path_buf();
                match edit_suspended(terminal, &path) {
                    Ok(()) => dashboard.pricing_edited(),
                    Err(err) => {
                        tracing::warn!(error = %err, "pricing edit failed");
                        dashboard.set_status(format!("Pricing edit failed: {err:#}"));
                    }
                }
            }
        }
    }
}

/// Hands the terminal to the editor and takes it back once the editor exits.
fn edit_suspended(terminal: &mut Term, path: &Path) -> Result<()> {
    ensure_override_file(path)?;
    disable_raw_mode().context("disable raw mode")?;
    terminal
        .backend_mut()
        .execute(LeaveAlternateScreen)
        .context("leave alternate screen")?;
    terminal.show_cursor().ok();

    let edited = open_in_editor(path);

    enable_raw_mode().context("enable raw mode")?;
    terminal
        .backend_mut()
        .execute(EnterAlternateScreen)
        .context("enter alternate screen")?;
    terminal.hide_cursor().ok();
    terminal.clear().context("clear terminal")?;
    edited
}

/// `$VISUAL`, then `$EDITOR`, then `vi`. The command may carry arguments (`code -w`).
pub fn editor_command() -> Vec<String> {
    let raw = std::env::var("VISUAL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var("EDITOR").ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| FALLBACK_EDITOR.to_string());
    split_command(&raw)
}

fn split_command(raw: &str) -> Vec<String> {
    let parts: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        vec![FALLBACK_EDITOR.to_string()]
    } else {
        parts
    }
}

pub fn open_in_editor(path: &Path) -> Result<()> {
    let command = editor_command();
    let (program, args) = command
        .split_first()
        .context("empty editor command")?;
    tracing::info!(editor = %program, path = %path.display(), "launching editor");
    let status = Command::new(program)
        .args(args)
        .arg(path)
        .status()
        .with_context(|| format!("launching editor '{program}'"))?;
    if !status.success() {
        anyhow::bail!("editor '{program}' exited with {status}");
    }
    Ok(())
}

fn render(f: &mut Frame<'_>, frame: &DashboardFrame) {
    let area = f.size();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(frame.table_height as u16),
            Constraint::Length(frame.totals_height as u16),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);

    let inverted = Style::default().add_modifier(Modifier::REVERSED);
    f.render_widget(
        Paragraph::new(pad_to(&frame.title, area.width)).style(inverted),
        chunks[0],
    );
    f.render_widget(
        Paragraph::new(frame.column_header.as_str())
            .style(Style::default().add_modifier(Modifier::BOLD)),
        chunks[1],
    );

    let rows: Vec<Line> = frame
        .rows
        .iter()
        .map(|row| {
            if row.selected {
                Line::from(Span::styled(row.text.clone(), inverted))
            } else {
                Line::from(row.text.clone())
            }
        })
        .collect();
    f.render_widget(Paragraph::new(rows), chunks[2]);

    render_totals(f, frame, chunks[3]);

    let footer_style = if frame.footer_is_status {
        inverted.add_modifier(Modifier::BOLD)
    } else {
        inverted
    };
    f.render_widget(
        Paragraph::new(pad_to(&frame.footer, area.width)).style(footer_style),
        chunks[5],
    );

    if let Some(menu) = &frame.menu {
        let menu_area = centered_rect(MENU_WIDTH, menu.options.len() as u16 + 2, area);
        f.render_widget(Clear, menu_area);
        let inner = MENU_WIDTH.saturating_sub(4) as usize;
        let lines: Vec<Line> = menu
            .options
            .iter()
            .enumerate()
            .map(|(i, option)| {
                let text = format!(" {option:^inner$} ");
                if i == menu.selected {
                    Line::from(Span::styled(text, inverted))
                } else {
                    Line::from(text)
                }
            })
            .collect();
        f.render_widget(
            Paragraph::new(lines).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Select Filter "),
            ),
            menu_area,
        );
    }
}

fn render_totals(f: &mut Frame<'_>, frame: &DashboardFrame, area: Rect) {
    let inner_width = area.width.saturating_sub(2) as usize;
    let lines: Vec<Line> = frame
        .totals
        .iter()
        .map(|line| match line {
            TotalsLine::Subtotal(text) => Line::from(text.clone()),
            TotalsLine::Separator => Line::from("-".repeat(inner_width)),
            TotalsLine::Grand(text) => Line::from(Span::styled(
                text.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
        })
        .collect();
    let block = Block::default().borders(Borders::ALL).title(Span::styled(
        frame.totals_title.clone(),
        Style::default().add_modifier(Modifier::BOLD),
    ));
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn pad_to(text: &str, width: u16) -> String {
    format!("{text:<width$}", width = width as usize)
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editor_command_splits_arguments() {
        assert_eq!(split_command("code -w"), vec!["code", "-w"]);
        assert_eq!(split_command("   "), vec!["vi"]);
    }

    #[test]
    fn menu_is_centered_and_clipped() {
        let area = Rect::new(0, 0, 80, 24);
        assert_eq!(centered_rect(20, 9, area), Rect::new(30, 7, 20, 9));
        let tiny = Rect::new(0, 0, 10, 4);
        assert_eq!(centered_rect(20, 9, tiny), Rect::new(0, 0, 10, 4));
    }
}
