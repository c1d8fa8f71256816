//! Event definitions for the application event loop.
//!
//! Everything that can change state funnels through `Event`: user input,
//! streamed subprocess lines, tailed log lines, and asynchronous command
//! results.

use crossterm::event::KeyEvent;

use crate::output::StatusLevel;

/// Identifies which panel a line of output belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelKind {
    /// Backend service log (petehome: the PM2 log panel).
    Backend,
    /// Frontend service log.
    Frontend,
    /// Command output.
    Output,
}

/// Represents an event in the application's main event loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A keyboard event received from the user.
    Key(KeyEvent),
    /// The terminal window was resized.
    Resize { width: u16, height: u16 },
    /// A line of subprocess output destined for a panel.
    Line { panel: PanelKind, line: String },
    /// A background command finished.
    CommandDone { name: String, code: i32 },
    /// A transient message for the status footer.
    Status { level: StatusLevel, text: String },
    /// The environment/auth summary bar should be recomputed.
    RefreshBars,
    /// Shut the application down.
    Quit,
}
