//! The main event loop shared by both binaries.
//!
//! A single mpsc channel carries key events from a blocking input thread,
//! lines from streamed subprocesses, and completions from spawned command
//! handlers. Log tailers are drained on a tick so a chatty dev server
//! cannot starve keyboard input.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;

use crate::app::{App, AppAction, Panel};
use crate::auth::AuthService;
use crate::commands::{dispatch, CmdContext, Dispatch, Registry};
use crate::events::{Event, PanelKind};
use crate::output::StatusLevel;
use crate::profile::Profile;
use crate::settings::Settings;
use crate::tail::LogTailer;
use crate::tui;

const TICK_RATE: Duration = Duration::from_millis(150);
const PANEL_MAX_LINES: usize = 5000;
const TAIL_LINES_PER_TICK: usize = 20;
const EVENT_QUEUE: usize = 256;

pub async fn run(profile: Profile, registry: Registry) -> Result<()> {
    let settings = Settings::load(&profile.settings_path())?;
    let profile = Arc::new(profile);

    if settings.prefs.clear_logs_on_start {
        truncate_logs(&profile);
    }

    let mut panels = Vec::new();
    if profile.split_service_logs {
        panels.push(Panel::new(PanelKind::Backend, "backend", PANEL_MAX_LINES));
        panels.push(Panel::new(PanelKind::Frontend, "frontend", PANEL_MAX_LINES));
    }
    panels.push(Panel::new(PanelKind::Output, "output", PANEL_MAX_LINES));

    let mut app = App::new(
        profile.app_name,
        panels,
        settings,
        registry.command_index(),
    );
    refresh_bars(&mut app, &profile);

    let (tx, mut rx) = mpsc::channel(EVENT_QUEUE);

    let mut tailer = LogTailer::new();
    for (panel, path) in &profile.tail_logs {
        tailer.watch(path.clone(), *panel);
    }

    spawn_input_listener(tx.clone());
    spawn_signal_listener(tx.clone());

    let mut terminal = tui::init_terminal().context("failed to initialize the terminal")?;
    let mut ticker = tokio::time::interval(TICK_RATE);
    let mut quit = false;
    let mut result = Ok(());

    loop {
        tokio::select! {
            Some(event) = rx.recv() => match event {
                Event::Key(key) => match app.handle_key(key) {
                    AppAction::Quit => quit = true,
                    AppAction::Dispatch(line) => {
                        run_line(&registry, &profile, &tx, &mut app, &line, &mut quit);
                    }
                    AppAction::None => {}
                },
                Event::Line { panel, line } => app.push_line(panel, &line),
                Event::Status { level, text } => app.set_status(level, text),
                Event::CommandDone { name, code } => {
                    if app.running_command.as_deref() == Some(name.as_str()) {
                        app.running_command = None;
                    }
                    if code != 0 && app.status_message().is_none() {
                        app.set_status(StatusLevel::Error, format!("{name} failed"));
                    }
                }
                Event::RefreshBars => refresh_bars(&mut app, &profile),
                Event::Resize { .. } => {
                    let _ = terminal.autoresize();
                }
                Event::Quit => quit = true,
            },
            _ = ticker.tick() => {
                for line in tailer.drain(TAIL_LINES_PER_TICK) {
                    app.push_line(line.panel, &line.text);
                }
                app.expire_status();
            }
        }

        if let Err(err) = tui::draw(&mut app, &mut terminal) {
            result = Err(err.into());
            break;
        }
        if quit {
            break;
        }
    }

    tailer.shutdown();
    tui::restore_terminal(terminal)?;
    result
}

/// Runs a single command without the TUI, printing its output to stdout.
/// Used for `armhr-cli status` style one-shots from scripts.
pub async fn run_once(profile: Profile, registry: Registry, line: &str) -> Result<()> {
    let profile = Arc::new(profile);
    match dispatch(&registry, line) {
        Dispatch::Empty | Dispatch::Quit | Dispatch::Clear => Ok(()),
        Dispatch::Help => {
            for help_line in registry.help_lines() {
                println!("{help_line}");
            }
            Ok(())
        }
        Dispatch::NotFound(name) => bail!("unknown command '{name}', try help"),
        Dispatch::BadLine(err) => bail!(err),
        Dispatch::Set { .. } => bail!("set is only available inside the console"),
        Dispatch::Run { def, args } => {
            let (tx, mut rx) = mpsc::channel(EVENT_QUEUE);
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match event {
                        Event::Line { line, .. } => println!("{line}"),
                        Event::Status { level: StatusLevel::Error, text } => eprintln!("{text}"),
                        Event::Status { text, .. } => println!("{text}"),
                        _ => {}
                    }
                }
            });
            let ctx = CmdContext {
                profile,
                tx,
            };
            let result = (def.run)(ctx, args).await;
            // The handler owned the last sender, so the printer drains
            // whatever is queued and then ends.
            let _ = printer.await;
            result
        }
    }
}

/// Parses one prompt line and either mutates the app (built-ins) or spawns
/// the matching command handler.
fn run_line(
    registry: &Registry,
    profile: &Arc<Profile>,
    tx: &mpsc::Sender<Event>,
    app: &mut App,
    line: &str,
    quit: &mut bool,
) {
    match dispatch(registry, line) {
        Dispatch::Empty => {}
        Dispatch::Quit => *quit = true,
        Dispatch::Clear => app.clear_output(),
        Dispatch::Help => {
            for help_line in registry.help_lines() {
                app.push_line(PanelKind::Output, &help_line);
            }
        }
        Dispatch::NotFound(name) => {
            app.set_status(
                StatusLevel::Error,
                format!("unknown command '{name}', type help"),
            );
        }
        Dispatch::BadLine(err) => app.set_status(StatusLevel::Error, err),
        Dispatch::Set { key, value } => apply_setting(app, profile, &key, &value),
        Dispatch::Run { def, args } => {
            let name = def.name;
            let handler = def.run;
            app.running_command = Some(name.to_string());
            let ctx = CmdContext {
                profile: profile.clone(),
                tx: tx.clone(),
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let code = match handler(ctx, args).await {
                    Ok(()) => 0,
                    Err(e) => {
                        let _ = tx
                            .send(Event::Status {
                                level: StatusLevel::Error,
                                text: e.to_string(),
                            })
                            .await;
                        1
                    }
                };
                let _ = tx
                    .send(Event::CommandDone {
                        name: name.to_string(),
                        code,
                    })
                    .await;
            });
        }
    }
}

/// Flips one boolean preference and persists the settings file.
fn apply_setting(app: &mut App, profile: &Profile, key: &str, value: &str) {
    let on = match value {
        "on" | "true" | "1" => true,
        "off" | "false" | "0" => false,
        _ => {
            app.set_status(StatusLevel::Error, format!("expected on or off, got '{value}'"));
            return;
        }
    };
    let prefs = &mut app.settings.prefs;
    match key {
        "clear_logs_on_start" => prefs.clear_logs_on_start = on,
        "clear_output_on_cmd" => prefs.clear_output_on_cmd = on,
        "input_at_top" => prefs.input_at_top = on,
        "stacked_logs" => prefs.stacked_logs = on,
        _ => {
            app.set_status(
                StatusLevel::Error,
                format!(
                    "unknown pref '{key}' (clear_logs_on_start, clear_output_on_cmd, \
                     input_at_top, stacked_logs)"
                ),
            );
            return;
        }
    }
    match app.settings.save(&profile.settings_path()) {
        Ok(()) => app.set_status(StatusLevel::Success, format!("{key} = {value}")),
        Err(e) => app.set_status(StatusLevel::Error, e.to_string()),
    }
}

/// Recomputes the env preset and auth summaries shown in the top bar.
fn refresh_bars(app: &mut App, profile: &Profile) {
    let mut bar = Vec::new();
    if let Some(env) = &profile.env {
        for (group, _) in crate::envfile::GROUP_PREFIXES {
            let (active, _) = env.identify_active(group);
            bar.push((group.to_string(), active));
        }
        if let Some(full) = env.identify_active_full() {
            bar.push(("full".to_string(), full));
        }
    }
    app.env_bar = bar;

    app.auth_line = profile.auth.as_ref().map(|config| {
        let status = AuthService::new(config.clone()).status();
        if !status.configured {
            "auth: unconfigured".to_string()
        } else if status.logged_in {
            let mins = status.expires_in.unwrap_or(0) / 60;
            format!("auth: ✓ {mins}m")
        } else {
            "auth: ✗".to_string()
        }
    });
}

fn truncate_logs(profile: &Profile) {
    for (_, path) in &profile.tail_logs {
        if path.exists() {
            let _ = std::fs::write(path, b"");
        }
    }
}

fn spawn_input_listener(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || loop {
        if crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false) {
            match crossterm::event::read() {
                Ok(crossterm::event::Event::Key(key)) => {
                    if tx.blocking_send(Event::Key(key)).is_err() {
                        break;
                    }
                }
                Ok(crossterm::event::Event::Resize(width, height)) => {
                    let _ = tx.blocking_send(Event::Resize { width, height });
                }
                _ => {}
            }
        }
    });
}

fn spawn_signal_listener(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            let _ = tx.send(Event::Quit).await;
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            let _ = tx.send(Event::Quit).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    fn app_for(profile: &Profile) -> App {
        let panels = vec![Panel::new(PanelKind::Output, "output", 100)];
        App::new(profile.app_name, panels, Settings::default(), Vec::new())
    }

    #[test]
    fn refresh_bars_reports_auth_state() {
        let profile = Profile::armhr();
        let mut app = app_for(&profile);
        refresh_bars(&mut app, &profile);
        // auth config exists for armhr even when env vars are unset
        assert!(app.auth_line.is_some());
    }

    #[test]
    fn apply_setting_rejects_bad_input() {
        let profile = Profile::petehome();
        let mut app = app_for(&profile);
        apply_setting(&mut app, &profile, "stacked_logs", "sideways");
        assert!(app.status_message().is_some());
        assert!(!app.settings.prefs.stacked_logs);
        apply_setting(&mut app, &profile, "mystery", "on");
        assert!(app.status_message().is_some());
    }

    #[test]
    fn petehome_has_no_summary_bar() {
        let profile = Profile::petehome();
        let mut app = app_for(&profile);
        refresh_bars(&mut app, &profile);
        assert!(app.env_bar.is_empty());
        assert!(app.auth_line.is_none());
    }
}
