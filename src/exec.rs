//! Shared subprocess helpers.
//!
//! Every service shells out through these functions so spawning, environment
//! merging, and line decoding live in one place. Captured runs return the
//! full output; streamed runs forward lines into the event loop as they
//! arrive.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::events::{Event, PanelKind};

/// Outcome of a captured command run.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn ok(&self) -> bool {
        self.code == 0
    }

    /// stdout on success, stderr on failure. Mirrors how callers report
    /// results to the output panel.
    pub fn text(&self) -> &str {
        if self.ok() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

fn build_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env: Option<&HashMap<String, String>>,
) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    if let Some(extra) = env {
        cmd.envs(extra);
    }
    cmd.kill_on_drop(true);
    cmd
}

/// Runs a command to completion and captures both streams.
pub async fn run(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env: Option<&HashMap<String, String>>,
) -> Result<CmdOutput> {
    let output = build_command(program, args, cwd, env)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("failed to run {program}"))?;
    Ok(CmdOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Runs a shell snippet via `sh -c`. For commands that need pipes or `&&`.
pub async fn run_shell(script: &str, cwd: Option<&Path>) -> Result<CmdOutput> {
    run("sh", &["-c", script], cwd, None).await
}

/// Runs a command with stderr merged into stdout, forwarding each line to
/// `panel` as it arrives. Returns the exit code.
pub async fn stream(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env: Option<&HashMap<String, String>>,
    tx: &mpsc::Sender<Event>,
    panel: PanelKind,
) -> Result<i32> {
    let mut child = build_command(program, args, cwd, env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let stdout = child.stdout.take().context("child stdout unavailable")?;
    let stderr = child.stderr.take().context("child stderr unavailable")?;

    let out_task = forward_lines(stdout, tx.clone(), panel);
    let err_task = forward_lines(stderr, tx.clone(), panel);
    let (out_res, err_res) = tokio::join!(out_task, err_task);
    out_res?;
    err_res?;

    let status = child.wait().await.context("failed waiting on child")?;
    Ok(status.code().unwrap_or(-1))
}

/// Streams a shell snippet, merged output, line by line.
pub async fn stream_shell(
    script: &str,
    cwd: Option<&Path>,
    tx: &mpsc::Sender<Event>,
    panel: PanelKind,
) -> Result<i32> {
    stream("sh", &["-c", script], cwd, None, tx, panel).await
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<Event>, panel: PanelKind) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end().to_string();
        if tx.send(Event::Line { panel, line }).await.is_err() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_exit_code_and_output() {
        let out = run("sh", &["-c", "echo hi; echo oops >&2; exit 3"], None, None)
            .await
            .unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.ok());
        assert_eq!(out.text().trim(), "oops");
    }

    #[tokio::test]
    async fn stream_merges_both_streams() {
        let (tx, mut rx) = mpsc::channel(64);
        let code = stream_shell("echo one; echo two >&2", None, &tx, PanelKind::Output)
            .await
            .unwrap();
        assert_eq!(code, 0);
        drop(tx);
        let mut lines = Vec::new();
        while let Some(event) = rx.recv().await {
            if let Event::Line { line, .. } = event {
                lines.push(line);
            }
        }
        lines.sort();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn run_env_overlay_reaches_child() {
        let mut env = HashMap::new();
        env.insert("DEVDECK_PROBE".to_string(), "42".to_string());
        let out = run("sh", &["-c", "printf '%s' \"$DEVDECK_PROBE\""], None, Some(&env))
            .await
            .unwrap();
        assert_eq!(out.stdout, "42");
    }
}
