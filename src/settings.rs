//! User preferences and keybindings.
//!
//! Stored as TOML under the app's home directory (`~/.armhr/settings.toml`,
//! `~/.petehome/settings.toml`). A missing file means defaults; saving
//! rewrites the whole file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Prefs {
    /// Truncate service log files when the app starts.
    pub clear_logs_on_start: bool,
    /// Clear the output panel before each dispatched command.
    pub clear_output_on_cmd: bool,
    /// Render the prompt above the panels instead of below.
    pub input_at_top: bool,
    /// Stack the service log panels vertically instead of side by side.
    pub stacked_logs: bool,
}

impl Default for Prefs {
    fn default() -> Self {
        Self {
            clear_logs_on_start: false,
            clear_output_on_cmd: true,
            input_at_top: false,
            stacked_logs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Keybindings {
    pub quit: String,
    pub clear_output: String,
    pub focus_backend: String,
    pub focus_frontend: String,
    pub focus_output: String,
    pub restore_panels: String,
}

impl Default for Keybindings {
    fn default() -> Self {
        Self {
            quit: "ctrl+q".to_string(),
            clear_output: "ctrl+l".to_string(),
            focus_backend: "ctrl+b".to_string(),
            focus_frontend: "ctrl+f".to_string(),
            focus_output: "ctrl+o".to_string(),
            restore_panels: "ctrl+r".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub prefs: Prefs,
    pub keys: Keybindings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = toml::to_string_pretty(self).context("failed to serialize settings")?;
        std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Default settings path for an app: `~/.{app}/settings.toml`.
pub fn settings_path(app_dir: &Path) -> PathBuf {
    app_dir.join("settings.toml")
}

/// Checks a key event against a binding string like `ctrl+l`, `f5`, `q`.
pub fn binding_matches(binding: &str, key: &KeyEvent) -> bool {
    let lower = binding.to_lowercase();
    let mut wants_ctrl = false;
    let mut wants_alt = false;
    let mut base = lower.as_str();
    for _ in 0..2 {
        if let Some(rest) = base.strip_prefix("ctrl+") {
            wants_ctrl = true;
            base = rest;
        } else if let Some(rest) = base.strip_prefix("alt+") {
            wants_alt = true;
            base = rest;
        }
    }

    if key.modifiers.contains(KeyModifiers::CONTROL) != wants_ctrl {
        return false;
    }
    if key.modifiers.contains(KeyModifiers::ALT) != wants_alt {
        return false;
    }

    match key.code {
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            base == c.to_lowercase().next().unwrap_or(c).encode_utf8(&mut buf)
        }
        KeyCode::F(n) => base == format!("f{n}"),
        KeyCode::Esc => base == "esc",
        KeyCode::Enter => base == "enter",
        KeyCode::Tab => base == "tab",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load(Path::new("/nonexistent/settings.toml")).unwrap();
        assert!(!settings.prefs.input_at_top);
        assert_eq!(settings.keys.quit, "ctrl+q");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let raw = "[prefs]\ninput_at_top = true\n";
        let settings: Settings = toml::from_str(raw).unwrap();
        assert!(settings.prefs.input_at_top);
        assert!(settings.prefs.clear_output_on_cmd);
        assert_eq!(settings.keys.clear_output, "ctrl+l");
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = std::env::temp_dir().join(format!("devdeck-settings-{}", std::process::id()));
        let path = dir.join("settings.toml");
        let mut settings = Settings::default();
        settings.prefs.stacked_logs = true;
        settings.keys.quit = "ctrl+d".to_string();
        settings.save(&path).unwrap();

        let reloaded = Settings::load(&path).unwrap();
        assert!(reloaded.prefs.stacked_logs);
        assert_eq!(reloaded.keys.quit, "ctrl+d");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bindings_match_modifiers_and_keys() {
        let ctrl_l = KeyEvent::new(KeyCode::Char('l'), KeyModifiers::CONTROL);
        assert!(binding_matches("ctrl+l", &ctrl_l));
        assert!(!binding_matches("l", &ctrl_l));

        let plain_q = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert!(binding_matches("q", &plain_q));
        assert!(!binding_matches("ctrl+q", &plain_q));

        let f5 = KeyEvent::new(KeyCode::F(5), KeyModifiers::NONE);
        assert!(binding_matches("f5", &f5));
    }
}
