//! Output buffering and line classification for the panels.
//!
//! Each panel owns a fixed-capacity ring buffer of sanitized lines. Lines
//! are classified by content so the renderer can tint errors, warnings, and
//! success markers the same way across every wrapped tool.

use std::collections::VecDeque;

use strip_ansi_escapes::strip;

/// Severity of a status footer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Warn,
    Error,
}

/// Content-derived tint for a panel line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTone {
    Plain,
    Error,
    Warn,
    Success,
}

/// A single line held by a panel buffer.
#[derive(Debug, Clone)]
pub struct PanelLine {
    pub text: String,
    pub tone: LineTone,
}

/// A fixed-capacity ring buffer for panel lines.
#[derive(Debug, Clone)]
pub struct PanelBuffer {
    max_lines: usize,
    lines: VecDeque<PanelLine>,
}

impl PanelBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines,
            lines: VecDeque::with_capacity(max_lines.min(1024)),
        }
    }

    /// Adds a line, dropping the oldest when full. Returns `true` if a line
    /// was dropped to make room.
    pub fn push(&mut self, line: PanelLine) -> bool {
        let mut dropped = false;
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
            dropped = true;
        }
        dropped
    }

    /// Sanitizes and classifies raw subprocess output before storing it.
    pub fn push_raw(&mut self, text: &str) -> bool {
        let clean = sanitize_text(text);
        let tone = classify_line(&clean);
        self.push(PanelLine { text: clean, tone })
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PanelLine> {
        self.lines.iter()
    }
}

/// Strips ANSI escapes and keeps only the final carriage-return segment so
/// progress spinners do not smear across the panel.
pub fn sanitize_text(text: &str) -> String {
    let stripped = strip(text.as_bytes());
    let plain = String::from_utf8_lossy(&stripped);
    plain.rsplit('\r').next().unwrap_or("").to_string()
}

/// Tints a line by content: errors red, warnings yellow, build/ready
/// markers green.
pub fn classify_line(line: &str) -> LineTone {
    let lower = line.to_lowercase();
    if lower.contains("error") || lower.contains("failed") || lower.contains("exception") {
        LineTone::Error
    } else if lower.contains("warn") {
        LineTone::Warn
    } else if lower.contains("ready") || lower.contains("success") || lower.contains("compiled") {
        LineTone::Success
    } else {
        LineTone::Plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_drops_oldest() {
        let mut buffer = PanelBuffer::new(2);
        buffer.push_raw("a");
        buffer.push_raw("b");
        let dropped = buffer.push_raw("c");
        assert!(dropped);
        let texts = buffer.iter().map(|l| l.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["b", "c"]);
    }

    #[test]
    fn sanitize_strips_ansi_and_carriage_returns() {
        assert_eq!(sanitize_text("\x1b[31mboom\x1b[0m"), "boom");
        assert_eq!(sanitize_text("10%\r50%\r100%"), "100%");
    }

    #[test]
    fn classification_matches_common_tool_output() {
        assert_eq!(classify_line("TypeError: x is undefined"), LineTone::Error);
        assert_eq!(classify_line("WARN deprecated dependency"), LineTone::Warn);
        assert_eq!(classify_line("✓ Compiled in 1.2s"), LineTone::Success);
        assert_eq!(classify_line("listening on :3000"), LineTone::Plain);
    }
}
