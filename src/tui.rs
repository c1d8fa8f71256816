//! Terminal setup and rendering.
//!
//! Raw-mode lifecycle plus the draw function that lays out the summary
//! bar, the log panels, the prompt, and the status footer from `App`
//! state. Rendering never mutates anything except each panel's recorded
//! viewport height.

use std::io::{self, Stdout};

use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Clear, Paragraph};
use ratatui::Terminal;

use crate::app::{App, Panel};
use crate::output::{LineTone, StatusLevel};

pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

const PROMPT_HEIGHT: u16 = 3;
const MAX_SUGGESTIONS: usize = 6;

pub fn draw(app: &mut App, terminal: &mut TuiTerminal) -> io::Result<()> {
    execute!(terminal.backend_mut(), SetTitle(app.app_name))?;
    terminal.draw(|frame| {
        let area = frame.size();

        let has_bar = !app.env_bar.is_empty() || app.auth_line.is_some();
        let prompt_on_top = app.settings.prefs.input_at_top;

        let mut constraints = Vec::new();
        if has_bar {
            constraints.push(Constraint::Length(1));
        }
        if prompt_on_top {
            constraints.push(Constraint::Length(PROMPT_HEIGHT));
            constraints.push(Constraint::Min(3));
        } else {
            constraints.push(Constraint::Min(3));
            constraints.push(Constraint::Length(PROMPT_HEIGHT));
        }
        constraints.push(Constraint::Length(1));

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(area);

        let mut row = 0;
        if has_bar {
            frame.render_widget(summary_bar(app), rows[row]);
            row += 1;
        }
        let (prompt_area, panels_area) = if prompt_on_top {
            (rows[row], rows[row + 1])
        } else {
            (rows[row + 1], rows[row])
        };
        let footer_area = rows[row + 2];

        draw_panels(app, frame, panels_area);
        draw_prompt(app, frame, prompt_area);
        frame.render_widget(footer(app), footer_area);

        if !app.suggestions.is_empty() {
            draw_suggestions(app, frame, prompt_area, area);
        }
        if app.show_help {
            draw_help(app, frame, area);
        }
    })?;
    Ok(())
}

fn draw_panels(app: &mut App, frame: &mut ratatui::Frame, area: Rect) {
    let visible: Vec<usize> = app
        .panels
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.collapsed)
        .map(|(i, _)| i)
        .collect();
    if visible.is_empty() {
        return;
    }

    let areas: Vec<Rect> = if app.settings.prefs.stacked_logs || visible.len() == 1 {
        let share = (100 / visible.len() as u16).max(1);
        Layout::default()
            .direction(Direction::Vertical)
            .constraints(vec![Constraint::Percentage(share); visible.len()])
            .split(area)
            .to_vec()
    } else {
        // Service panels share the top row, the output panel gets the
        // full width underneath.
        let service: Vec<usize> = visible[..visible.len() - 1].to_vec();
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(area);
        let share = (100 / service.len().max(1) as u16).max(1);
        let mut out = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![Constraint::Percentage(share); service.len()])
            .split(rows[0])
            .to_vec();
        out.push(rows[1]);
        out
    };

    for (slot, panel_idx) in visible.iter().enumerate() {
        let focused = *panel_idx == app.focus;
        let panel = &mut app.panels[*panel_idx];
        render_panel(panel, focused, frame, areas[slot]);
    }
}

fn render_panel(panel: &mut Panel, focused: bool, frame: &mut ratatui::Frame, area: Rect) {
    let border_style = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let mut title = panel.title.clone();
    if !panel.follow {
        title.push_str(" [scroll]");
    }
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(border_style);
    let inner = block.inner(area);
    panel.view_height = inner.height as usize;

    let start = panel.view_start();
    let width = inner.width as usize;
    let lines: Vec<Line> = panel
        .buffer
        .iter()
        .skip(start)
        .take(inner.height as usize)
        .map(|l| Line::from(Span::styled(truncate(&l.text, width), tone_style(l.tone))))
        .collect();

    frame.render_widget(Paragraph::new(Text::from(lines)).block(block), area);
}

fn draw_prompt(app: &App, frame: &mut ratatui::Frame, area: Rect) {
    let running = app
        .running_command
        .as_deref()
        .map(|name| format!(" running: {name} "))
        .unwrap_or_default();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(running);
    let inner = block.inner(area);
    let line = Line::from(vec![
        Span::styled("❯ ", Style::default().fg(Color::Cyan)),
        Span::raw(app.input.clone()),
    ]);
    frame.render_widget(Paragraph::new(line).block(block), area);
    let cursor_x = inner.x + 2 + app.input.chars().count() as u16;
    frame.set_cursor(cursor_x.min(inner.right().saturating_sub(1)), inner.y);
}

/// Suggestion drop-up anchored to the prompt, growing away from it.
fn draw_suggestions(app: &App, frame: &mut ratatui::Frame, prompt_area: Rect, screen: Rect) {
    let count = app.suggestions.len().min(MAX_SUGGESTIONS) as u16;
    let width = app
        .suggestions
        .iter()
        .map(|(n, s)| n.len() + s.len() + 4)
        .max()
        .unwrap_or(20)
        .min(screen.width.saturating_sub(2) as usize) as u16;

    let above = prompt_area.y >= count;
    let y = if above {
        prompt_area.y - count
    } else {
        (prompt_area.y + prompt_area.height).min(screen.height.saturating_sub(count))
    };
    let area = Rect::new(prompt_area.x + 2, y, width, count);

    let lines: Vec<Line> = app
        .suggestions
        .iter()
        .take(MAX_SUGGESTIONS)
        .map(|(name, summary)| {
            Line::from(vec![
                Span::styled(format!("{name:<12}"), Style::default().fg(Color::Cyan)),
                Span::styled(summary.clone(), Style::default().fg(Color::DarkGray)),
            ])
        })
        .collect();
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines)).style(Style::default().bg(Color::Black)),
        area,
    );
}

fn summary_bar(app: &App) -> Paragraph<'static> {
    let mut spans = vec![Span::styled(
        format!(" {} ", app.app_name),
        Style::default()
            .fg(Color::Black)
            .bg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )];
    for (label, value) in &app.env_bar {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("{label}:"),
            Style::default().fg(Color::DarkGray),
        ));
        spans.push(Span::raw(value.clone()));
    }
    if let Some(auth) = &app.auth_line {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            auth.clone(),
            Style::default().fg(Color::Magenta),
        ));
    }
    Paragraph::new(Line::from(spans))
}

fn footer(app: &App) -> Paragraph<'static> {
    let line = match app.status_message() {
        Some(status) => Line::from(Span::styled(
            format!(" {}", status.text),
            status_style(status.level),
        )),
        None => Line::from(Span::styled(
            " ? help | tab cycle | ctrl-q quit",
            Style::default().fg(Color::DarkGray),
        )),
    };
    Paragraph::new(line)
}

fn draw_help(app: &App, frame: &mut ratatui::Frame, area: Rect) {
    let keys = &app.settings.keys;
    let text = vec![
        "Prompt:".to_string(),
        "  Enter        run the typed command".to_string(),
        "  Tab          complete suggestion / cycle focus".to_string(),
        "  Up/Down      command history".to_string(),
        "  Esc          clear the prompt".to_string(),
        String::new(),
        "Panels:".to_string(),
        "  PageUp/Down  scroll the focused panel".to_string(),
        "  Home/End     jump to top / resume follow".to_string(),
        format!("  {}       focus backend logs", keys.focus_backend),
        format!("  {}       focus frontend logs", keys.focus_frontend),
        format!("  {}       focus command output", keys.focus_output),
        format!("  {}       restore all panels", keys.restore_panels),
        String::new(),
        "General:".to_string(),
        format!("  {}       clear the output panel", keys.clear_output),
        format!("  {}       quit", keys.quit),
        String::new(),
        "Type help for the command list. Any key closes this.".to_string(),
    ]
    .join("\n");

    let popup = centered_rect(60, 70, area);
    let widget = Paragraph::new(text)
        .block(
            Block::default()
                .title("Keys")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        )
        .style(Style::default().bg(Color::Black).fg(Color::White));
    frame.render_widget(Clear, popup);
    frame.render_widget(widget, popup);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

fn tone_style(tone: LineTone) -> Style {
    match tone {
        LineTone::Plain => Style::default(),
        LineTone::Error => Style::default().fg(Color::Red),
        LineTone::Warn => Style::default().fg(Color::Yellow),
        LineTone::Success => Style::default().fg(Color::Green),
    }
}

fn status_style(level: StatusLevel) -> Style {
    match level {
        StatusLevel::Info => Style::default().fg(Color::Cyan),
        StatusLevel::Success => Style::default().fg(Color::Green),
        StatusLevel::Warn => Style::default().fg(Color::Yellow),
        StatusLevel::Error => Style::default().fg(Color::Red),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('~');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_rect_stays_inside_the_parent() {
        let parent = Rect::new(0, 0, 100, 40);
        let popup = centered_rect(60, 70, parent);
        assert!(popup.x >= parent.x && popup.right() <= parent.right());
        assert!(popup.y >= parent.y && popup.bottom() <= parent.bottom());
        assert_eq!(popup.width, 60);
    }

    #[test]
    fn truncate_marks_cut_lines() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello w~");
        assert_eq!(truncate("hello", 0), "");
    }

    #[test]
    fn tones_map_to_distinct_colors() {
        assert_ne!(tone_style(LineTone::Error), tone_style(LineTone::Plain));
        assert_ne!(tone_style(LineTone::Warn), tone_style(LineTone::Success));
    }
}
