//! Application state and key handling.
//!
//! `App` owns the panels, the prompt, and the transient UI state; key
//! events mutate it and hand back an `AppAction` for the runtime to carry
//! out. Nothing here touches the terminal, which keeps the whole state
//! machine unit-testable.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::events::PanelKind;
use crate::output::{PanelBuffer, StatusLevel};
use crate::settings::{binding_matches, Settings};

const STATUS_TTL: Duration = Duration::from_secs(5);
const MAX_HISTORY: usize = 200;

/// What the runtime should do after a key was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    None,
    Quit,
    /// Run this prompt line through the command dispatcher.
    Dispatch(String),
}

/// One output panel with its scroll state.
#[derive(Debug, Clone)]
pub struct Panel {
    pub kind: PanelKind,
    pub title: String,
    pub buffer: PanelBuffer,
    pub scroll: usize,
    pub follow: bool,
    pub collapsed: bool,
    pub view_height: usize,
}

impl Panel {
    pub fn new(kind: PanelKind, title: impl Into<String>, max_lines: usize) -> Self {
        Self {
            kind,
            title: title.into(),
            buffer: PanelBuffer::new(max_lines),
            scroll: 0,
            follow: true,
            collapsed: false,
            view_height: 0,
        }
    }

    pub fn push_line(&mut self, text: &str) {
        self.buffer.push_raw(text);
        if !self.follow {
            // Keep the viewport anchored when lines fall off the front.
            self.scroll = self.scroll.min(self.max_scroll());
        }
    }

    fn max_scroll(&self) -> usize {
        self.buffer.len().saturating_sub(self.view_height.max(1))
    }

    pub fn scroll_up(&mut self, lines: usize) {
        let start = self.view_start();
        self.follow = false;
        self.scroll = start.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        let max = self.max_scroll();
        let start = self.view_start();
        self.scroll = (start + lines).min(max);
        if self.scroll >= max {
            self.follow = true;
        }
    }

    pub fn scroll_to_top(&mut self) {
        self.follow = false;
        self.scroll = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.follow = true;
        self.scroll = self.max_scroll();
    }

    /// First visible line index for the current viewport.
    pub fn view_start(&self) -> usize {
        if self.follow {
            self.max_scroll()
        } else {
            self.scroll.min(self.max_scroll())
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub text: String,
    pub level: StatusLevel,
    expires_at: Instant,
}

pub struct App {
    pub app_name: &'static str,
    pub panels: Vec<Panel>,
    pub focus: usize,
    pub input: String,
    pub history: Vec<String>,
    history_pos: Option<usize>,
    /// Saved prompt content while browsing history.
    stash: String,
    pub suggestions: Vec<(String, String)>,
    pub show_help: bool,
    pub settings: Settings,
    /// `(name, summary)` pairs for autocomplete.
    pub command_index: Vec<(String, String)>,
    pub env_bar: Vec<(String, String)>,
    pub auth_line: Option<String>,
    pub running_command: Option<String>,
    status: Option<StatusMessage>,
}

impl App {
    pub fn new(
        app_name: &'static str,
        panels: Vec<Panel>,
        settings: Settings,
        command_index: Vec<(String, String)>,
    ) -> Self {
        Self {
            app_name,
            panels,
            focus: 0,
            input: String::new(),
            history: Vec::new(),
            history_pos: None,
            stash: String::new(),
            suggestions: Vec::new(),
            show_help: false,
            settings,
            command_index,
            env_bar: Vec::new(),
            auth_line: None,
            running_command: None,
            status: None,
        }
    }

    pub fn panel(&self, kind: PanelKind) -> Option<&Panel> {
        self.panels.iter().find(|p| p.kind == kind)
    }

    pub fn panel_mut(&mut self, kind: PanelKind) -> Option<&mut Panel> {
        self.panels.iter_mut().find(|p| p.kind == kind)
    }

    pub fn focused_panel_mut(&mut self) -> Option<&mut Panel> {
        let focus = self.focus;
        self.panels.get_mut(focus)
    }

    pub fn push_line(&mut self, kind: PanelKind, text: &str) {
        if let Some(panel) = self.panel_mut(kind) {
            panel.push_line(text);
        }
    }

    pub fn clear_output(&mut self) {
        if let Some(panel) = self.panel_mut(PanelKind::Output) {
            panel.buffer.clear();
            panel.scroll = 0;
            panel.follow = true;
        }
    }

    pub fn set_status(&mut self, level: StatusLevel, text: impl Into<String>) {
        self.status = Some(StatusMessage {
            text: text.into(),
            level,
            expires_at: Instant::now() + STATUS_TTL,
        });
    }

    pub fn status_message(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    /// Drops the status message once its TTL has passed. Called on tick.
    pub fn expire_status(&mut self) {
        if let Some(status) = &self.status {
            if Instant::now() >= status.expires_at {
                self.status = None;
            }
        }
    }

    /// Focuses one panel and collapses the rest, zooming it full-size.
    fn focus_panel(&mut self, kind: PanelKind) {
        if let Some(idx) = self.panels.iter().position(|p| p.kind == kind) {
            self.focus = idx;
            for (i, panel) in self.panels.iter_mut().enumerate() {
                panel.collapsed = i != idx;
            }
        }
    }

    fn restore_panels(&mut self) {
        for panel in &mut self.panels {
            panel.collapsed = false;
        }
    }

    fn refresh_suggestions(&mut self) {
        let query = self.input.trim_start();
        // Only suggest while typing the command word itself.
        if query.is_empty() || query.contains(' ') {
            self.suggestions.clear();
            return;
        }
        self.suggestions = self
            .command_index
            .iter()
            .filter(|(name, _)| name.starts_with(query) && name.as_str() != query)
            .cloned()
            .collect();
    }

    fn history_prev(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let pos = match self.history_pos {
            None => {
                self.stash = self.input.clone();
                self.history.len() - 1
            }
            Some(0) => 0,
            Some(p) => p - 1,
        };
        self.history_pos = Some(pos);
        self.input = self.history[pos].clone();
        self.suggestions.clear();
    }

    fn history_next(&mut self) {
        match self.history_pos {
            None => {}
            Some(p) if p + 1 < self.history.len() => {
                self.history_pos = Some(p + 1);
                self.input = self.history[p + 1].clone();
            }
            Some(_) => {
                self.history_pos = None;
                self.input = self.stash.clone();
            }
        }
        self.suggestions.clear();
    }

    fn submit(&mut self) -> AppAction {
        let line = self.input.trim().to_string();
        self.input.clear();
        self.history_pos = None;
        self.suggestions.clear();
        if line.is_empty() {
            return AppAction::None;
        }
        if self.history.last() != Some(&line) {
            self.history.push(line.clone());
            if self.history.len() > MAX_HISTORY {
                self.history.remove(0);
            }
        }
        if self.settings.prefs.clear_output_on_cmd {
            self.clear_output();
        }
        AppAction::Dispatch(line)
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> AppAction {
        if self.show_help {
            self.show_help = false;
            return AppAction::None;
        }

        let keys = self.settings.keys.clone();
        if binding_matches(&keys.quit, &key) {
            return AppAction::Quit;
        }
        if binding_matches(&keys.clear_output, &key) {
            self.clear_output();
            return AppAction::None;
        }
        if binding_matches(&keys.focus_backend, &key) {
            self.focus_panel(PanelKind::Backend);
            return AppAction::None;
        }
        if binding_matches(&keys.focus_frontend, &key) {
            self.focus_panel(PanelKind::Frontend);
            return AppAction::None;
        }
        if binding_matches(&keys.focus_output, &key) {
            self.focus_panel(PanelKind::Output);
            return AppAction::None;
        }
        if binding_matches(&keys.restore_panels, &key) {
            self.restore_panels();
            return AppAction::None;
        }

        match key.code {
            KeyCode::Enter => return self.submit(),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return AppAction::Quit;
            }
            KeyCode::Char('?') if self.input.is_empty() => {
                self.show_help = true;
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.input.push(c);
                self.history_pos = None;
                self.refresh_suggestions();
            }
            KeyCode::Backspace => {
                self.input.pop();
                self.refresh_suggestions();
            }
            KeyCode::Esc => {
                self.input.clear();
                self.suggestions.clear();
                self.history_pos = None;
            }
            KeyCode::Tab if !self.suggestions.is_empty() => {
                self.input = self.suggestions[0].0.clone();
                self.input.push(' ');
                self.suggestions.clear();
            }
            KeyCode::Tab => {
                if !self.panels.is_empty() {
                    self.focus = (self.focus + 1) % self.panels.len();
                }
            }
            KeyCode::Up => self.history_prev(),
            KeyCode::Down => self.history_next(),
            KeyCode::PageUp => {
                if let Some(panel) = self.focused_panel_mut() {
                    let step = panel.view_height.max(1);
                    panel.scroll_up(step);
                }
            }
            KeyCode::PageDown => {
                if let Some(panel) = self.focused_panel_mut() {
                    let step = panel.view_height.max(1);
                    panel.scroll_down(step);
                }
            }
            KeyCode::Home => {
                if let Some(panel) = self.focused_panel_mut() {
                    panel.scroll_to_top();
                }
            }
            KeyCode::End => {
                if let Some(panel) = self.focused_panel_mut() {
                    panel.scroll_to_bottom();
                }
            }
            _ => {}
        }
        AppAction::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_app() -> App {
        let panels = vec![
            Panel::new(PanelKind::Backend, "backend", 100),
            Panel::new(PanelKind::Frontend, "frontend", 100),
            Panel::new(PanelKind::Output, "output", 100),
        ];
        let index = vec![
            ("status".to_string(), "service status".to_string()),
            ("start".to_string(), "start services".to_string()),
            ("git".to_string(), "git operations".to_string()),
        ];
        App::new("armhr", panels, Settings::default(), index)
    }

    fn press(app: &mut App, code: KeyCode) -> AppAction {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_str(app: &mut App, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    #[test]
    fn enter_dispatches_and_records_history() {
        let mut app = make_app();
        type_str(&mut app, "status");
        assert_eq!(press(&mut app, KeyCode::Enter), AppAction::Dispatch("status".into()));
        assert!(app.input.is_empty());
        assert_eq!(app.history, vec!["status"]);

        // blank lines are swallowed
        assert_eq!(press(&mut app, KeyCode::Enter), AppAction::None);
        assert_eq!(app.history.len(), 1);
    }

    #[test]
    fn history_navigation_round_trips() {
        let mut app = make_app();
        type_str(&mut app, "status");
        press(&mut app, KeyCode::Enter);
        type_str(&mut app, "git st");
        press(&mut app, KeyCode::Enter);

        type_str(&mut app, "par");
        press(&mut app, KeyCode::Up);
        assert_eq!(app.input, "git st");
        press(&mut app, KeyCode::Up);
        assert_eq!(app.input, "status");
        press(&mut app, KeyCode::Down);
        assert_eq!(app.input, "git st");
        press(&mut app, KeyCode::Down);
        assert_eq!(app.input, "par");
    }

    #[test]
    fn suggestions_track_the_command_word() {
        let mut app = make_app();
        type_str(&mut app, "st");
        let names: Vec<&str> = app.suggestions.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["status", "start"]);

        // tab completes the first suggestion
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.input, "status ");
        assert!(app.suggestions.is_empty());

        // arguments never trigger suggestions
        type_str(&mut app, "x");
        assert!(app.suggestions.is_empty());
    }

    #[test]
    fn scrolling_toggles_follow() {
        let mut app = make_app();
        for i in 0..50 {
            app.push_line(PanelKind::Output, &format!("line {i}"));
        }
        app.focus = 2;
        let panel = app.panel_mut(PanelKind::Output).unwrap();
        panel.view_height = 10;
        assert!(panel.follow);

        press(&mut app, KeyCode::PageUp);
        let panel = app.panel(PanelKind::Output).unwrap();
        assert!(!panel.follow);
        assert_eq!(panel.view_start(), 30);

        press(&mut app, KeyCode::End);
        let panel = app.panel(PanelKind::Output).unwrap();
        assert!(panel.follow);
        assert_eq!(panel.view_start(), 40);
    }

    #[test]
    fn configured_bindings_win_over_text_entry() {
        let mut app = make_app();
        let quit = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL);
        assert_eq!(app.handle_key(quit), AppAction::Quit);

        app.push_line(PanelKind::Output, "something");
        let clear = KeyEvent::new(KeyCode::Char('l'), KeyModifiers::CONTROL);
        app.handle_key(clear);
        assert!(app.panel(PanelKind::Output).unwrap().buffer.is_empty());
    }

    #[test]
    fn focus_binding_zooms_one_panel() {
        let mut app = make_app();
        let focus_backend = KeyEvent::new(KeyCode::Char('b'), KeyModifiers::CONTROL);
        app.handle_key(focus_backend);
        assert_eq!(app.focus, 0);
        assert!(!app.panels[0].collapsed);
        assert!(app.panels[1].collapsed);
        assert!(app.panels[2].collapsed);

        let restore = KeyEvent::new(KeyCode::Char('r'), KeyModifiers::CONTROL);
        app.handle_key(restore);
        assert!(app.panels.iter().all(|p| !p.collapsed));
    }

    #[test]
    fn help_overlay_swallows_the_next_key() {
        let mut app = make_app();
        press(&mut app, KeyCode::Char('?'));
        assert!(app.show_help);
        press(&mut app, KeyCode::Char('x'));
        assert!(!app.show_help);
        assert!(app.input.is_empty());
    }

    #[test]
    fn status_expires_after_ttl() {
        let mut app = make_app();
        app.set_status(StatusLevel::Info, "hello");
        assert!(app.status_message().is_some());
        app.status = Some(StatusMessage {
            text: "old".into(),
            level: StatusLevel::Info,
            expires_at: Instant::now() - Duration::from_secs(1),
        });
        app.expire_status();
        assert!(app.status_message().is_none());
    }
}
