//! Command registry and dispatch.
//!
//! Every prompt line is tokenized with shell rules, the first token is
//! looked up in the registry, and the handler runs as a background task
//! that reports through the event channel. Built-ins (quit, clear, help)
//! and the single-letter git shortcuts are resolved before the lookup.

pub mod armhr;
pub mod git;
pub mod petehome;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::events::{Event, PanelKind};
use crate::output::StatusLevel;
use crate::profile::Profile;

/// Shared context handed to every command handler.
#[derive(Clone)]
pub struct CmdContext {
    pub profile: Arc<Profile>,
    pub tx: mpsc::Sender<Event>,
}

impl CmdContext {
    /// Writes a line to the output panel.
    pub async fn say(&self, line: impl Into<String>) {
        let _ = self
            .tx
            .send(Event::Line {
                panel: PanelKind::Output,
                line: line.into(),
            })
            .await;
    }

    pub async fn say_lines(&self, text: &str) {
        for line in text.lines() {
            self.say(line.to_string()).await;
        }
    }

    pub async fn status(&self, level: StatusLevel, text: impl Into<String>) {
        let _ = self
            .tx
            .send(Event::Status {
                level,
                text: text.into(),
            })
            .await;
    }

    /// Asks the UI to recompute the env/auth summary bar.
    pub async fn refresh_bars(&self) {
        let _ = self.tx.send(Event::RefreshBars).await;
    }
}

pub type CmdFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type Handler = fn(CmdContext, Vec<String>) -> CmdFuture;

pub struct CommandDef {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub usage: &'static str,
    pub summary: &'static str,
    pub section: &'static str,
    pub run: Handler,
}

#[derive(Default)]
pub struct Registry {
    defs: Vec<CommandDef>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: CommandDef) {
        self.defs.push(def);
    }

    pub fn find(&self, name: &str) -> Option<&CommandDef> {
        self.defs
            .iter()
            .find(|d| d.name == name || d.aliases.contains(&name))
    }

    /// `(name, summary)` pairs for the autocomplete drop-up.
    pub fn command_index(&self) -> Vec<(String, String)> {
        let mut index: Vec<(String, String)> = self
            .defs
            .iter()
            .map(|d| (d.name.to_string(), d.summary.to_string()))
            .collect();
        index.push(("help".to_string(), "show available commands".to_string()));
        index.push(("clear".to_string(), "clear the output panel".to_string()));
        index.push(("set".to_string(), "toggle a preference".to_string()));
        index.push(("quit".to_string(), "exit the app".to_string()));
        index.sort();
        index
    }

    /// Help text grouped by section, in registration order.
    pub fn help_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut sections: Vec<&str> = Vec::new();
        for def in &self.defs {
            if !sections.contains(&def.section) {
                sections.push(def.section);
            }
        }
        for section in sections {
            lines.push(format!("{section}:"));
            for def in self.defs.iter().filter(|d| d.section == section) {
                lines.push(format!("  {:<24} {}", def.usage, def.summary));
            }
            lines.push(String::new());
        }
        lines.push("General:".to_string());
        lines.push(format!("  {:<24} {}", "help | ?", "show this help"));
        lines.push(format!("  {:<24} {}", "clear | cls", "clear the output panel"));
        lines.push(format!("  {:<24} {}", "set <pref> <on|off>", "toggle a preference"));
        lines.push(format!("  {:<24} {}", "quit | exit | q", "exit the app"));
        lines
    }
}

/// Outcome of parsing one prompt line.
pub enum Dispatch<'a> {
    Empty,
    Quit,
    Clear,
    Help,
    NotFound(String),
    BadLine(String),
    Set {
        key: String,
        value: String,
    },
    Run {
        def: &'a CommandDef,
        args: Vec<String>,
    },
}

/// Single-letter git shortcuts carried over from shell habits.
fn expand_shortcut(mut tokens: Vec<String>) -> Vec<String> {
    let expansion: &[&str] = match tokens[0].as_str() {
        "gs" => &["git", "status"],
        "ga" => &["git", "add"],
        "gc" => &["git", "commit"],
        "gp" => &["git", "push"],
        "gpo" => &["git", "push", "-u"],
        "gpl" => &["git", "pull"],
        "gl" => &["git", "log"],
        "gd" => &["git", "diff"],
        "gpr" => &["git", "pr"],
        _ => return tokens,
    };
    let mut out: Vec<String> = expansion.iter().map(|s| s.to_string()).collect();
    out.extend(tokens.drain(1..));
    out
}

pub fn dispatch<'a>(registry: &'a Registry, line: &str) -> Dispatch<'a> {
    let tokens = match shell_words::split(line) {
        Ok(tokens) => tokens,
        Err(e) => return Dispatch::BadLine(format!("parse error: {e}")),
    };
    if tokens.is_empty() {
        return Dispatch::Empty;
    }
    let tokens = expand_shortcut(tokens);
    match tokens[0].as_str() {
        "quit" | "exit" | "q" => Dispatch::Quit,
        "clear" | "cls" => Dispatch::Clear,
        "help" | "?" | "h" => Dispatch::Help,
        "set" => match (tokens.get(1), tokens.get(2)) {
            (Some(key), Some(value)) => Dispatch::Set {
                key: key.clone(),
                value: value.clone(),
            },
            _ => Dispatch::BadLine("usage: set <pref> <on|off>".to_string()),
        },
        name => match registry.find(name) {
            Some(def) => Dispatch::Run {
                def,
                args: tokens[1..].to_vec(),
            },
            None => Dispatch::NotFound(name.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: CmdContext, _args: Vec<String>) -> CmdFuture {
        Box::pin(async { Ok(()) })
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(CommandDef {
            name: "git",
            aliases: &[],
            usage: "git <subcommand>",
            summary: "git operations",
            section: "Git",
            run: noop,
        });
        registry.register(CommandDef {
            name: "status",
            aliases: &["s"],
            usage: "status",
            summary: "service status",
            section: "Services",
            run: noop,
        });
        registry
    }

    #[test]
    fn builtins_win_over_registry() {
        let registry = registry();
        assert!(matches!(dispatch(&registry, "quit"), Dispatch::Quit));
        assert!(matches!(dispatch(&registry, "q"), Dispatch::Quit));
        assert!(matches!(dispatch(&registry, "cls"), Dispatch::Clear));
        assert!(matches!(dispatch(&registry, "?"), Dispatch::Help));
        assert!(matches!(dispatch(&registry, "   "), Dispatch::Empty));
    }

    #[test]
    fn aliases_resolve_to_commands() {
        let registry = registry();
        match dispatch(&registry, "s") {
            Dispatch::Run { def, args } => {
                assert_eq!(def.name, "status");
                assert!(args.is_empty());
            }
            _ => panic!("expected a run"),
        }
    }

    #[test]
    fn shortcuts_expand_with_arguments() {
        let registry = registry();
        match dispatch(&registry, "gc \"fix the build\"") {
            Dispatch::Run { def, args } => {
                assert_eq!(def.name, "git");
                assert_eq!(args, vec!["commit", "fix the build"]);
            }
            _ => panic!("expected a run"),
        }
        match dispatch(&registry, "gpo") {
            Dispatch::Run { args, .. } => assert_eq!(args, vec!["push", "-u"]),
            _ => panic!("expected a run"),
        }
    }

    #[test]
    fn set_requires_a_key_and_value() {
        let registry = registry();
        match dispatch(&registry, "set stacked_logs on") {
            Dispatch::Set { key, value } => {
                assert_eq!(key, "stacked_logs");
                assert_eq!(value, "on");
            }
            _ => panic!("expected a set"),
        }
        assert!(matches!(dispatch(&registry, "set stacked_logs"), Dispatch::BadLine(_)));
    }

    #[test]
    fn unknown_commands_are_reported() {
        let registry = registry();
        match dispatch(&registry, "warp 9") {
            Dispatch::NotFound(name) => assert_eq!(name, "warp"),
            _ => panic!("expected not-found"),
        }
    }

    #[test]
    fn unbalanced_quotes_are_a_parse_error() {
        let registry = registry();
        assert!(matches!(dispatch(&registry, "gc \"oops"), Dispatch::BadLine(_)));
    }

    #[test]
    fn help_lines_group_by_section() {
        let registry = registry();
        let lines = registry.help_lines();
        assert_eq!(lines[0], "Git:");
        assert!(lines.iter().any(|l| l == "Services:"));
        assert!(lines.iter().any(|l| l.contains("quit | exit | q")));
    }

    #[test]
    fn command_index_includes_builtins() {
        let registry = registry();
        let index = registry.command_index();
        assert!(index.iter().any(|(n, _)| n == "git"));
        assert!(index.iter().any(|(n, _)| n == "help"));
    }
}
