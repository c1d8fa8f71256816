//! Detached process lifecycle management.
//!
//! Dev servers are launched through `nohup` inside a login-ish shell so they
//! keep running after the CLI exits, with the child pid recorded in a
//! pidfile. Stopping walks the descendant tree first because the recorded
//! pid is usually a package-manager wrapper whose children hold the ports.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::exec;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STOP_POLL_ROUNDS: u32 = 30;

/// Static description of a managed background service.
#[derive(Debug, Clone)]
pub struct DaemonSpec {
    /// Short name used in status output ("backend", "frontend").
    pub name: String,
    /// Shell command that starts the service.
    pub command: String,
    /// Directory to start in.
    pub cwd: PathBuf,
    /// Extra environment exported before launch.
    pub env: HashMap<String, String>,
    /// File the service's merged output is appended to.
    pub log_file: PathBuf,
    /// File holding the launched pid.
    pub pid_file: PathBuf,
}

/// Point-in-time view of a daemon.
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub name: String,
    pub running: bool,
    pub pid: Option<i32>,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy)]
pub struct StopOutcome {
    /// Processes that exited after SIGTERM.
    pub terminated: usize,
    /// Stragglers that needed SIGKILL.
    pub killed: usize,
}

#[derive(Debug, Clone)]
pub struct Daemon {
    spec: DaemonSpec,
}

impl Daemon {
    pub fn new(spec: DaemonSpec) -> Self {
        Self { spec }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn log_file(&self) -> &PathBuf {
        &self.spec.log_file
    }

    /// Reads the recorded pid, if any.
    pub fn pid(&self) -> Option<i32> {
        let raw = std::fs::read_to_string(&self.spec.pid_file).ok()?;
        raw.trim().parse().ok()
    }

    /// True when the recorded pid is alive. A stale pidfile is removed.
    pub fn is_running(&self) -> bool {
        match self.pid() {
            Some(pid) if process_alive(pid) => true,
            Some(_) => {
                let _ = std::fs::remove_file(&self.spec.pid_file);
                false
            }
            None => false,
        }
    }

    pub fn status(&self) -> DaemonStatus {
        let running = self.is_running();
        DaemonStatus {
            name: self.spec.name.clone(),
            running,
            pid: if running { self.pid() } else { None },
        }
    }

    /// Launches the service detached and records its pid.
    pub async fn start(&self) -> Result<i32> {
        if self.is_running() {
            bail!(
                "{} is already running (pid {})",
                self.spec.name,
                self.pid().unwrap_or(0)
            );
        }
        if let Some(parent) = self.spec.log_file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let script = launch_script(&self.spec);
        let out = exec::run("bash", &["-c", &script], None, None).await?;
        if !out.ok() {
            bail!("failed to launch {}: {}", self.spec.name, out.stderr.trim());
        }

        // The pidfile is written by the launch shell; give it a beat.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let pid = self
            .pid()
            .with_context(|| format!("{} left no pidfile behind", self.spec.name))?;
        if !process_alive(pid) {
            let _ = std::fs::remove_file(&self.spec.pid_file);
            bail!(
                "{} exited immediately, check {}",
                self.spec.name,
                self.spec.log_file.display()
            );
        }
        Ok(pid)
    }

    /// Stops the service and its whole descendant tree.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let root = match self.pid() {
            Some(pid) if process_alive(pid) => pid,
            _ => {
                let _ = std::fs::remove_file(&self.spec.pid_file);
                bail!("{} is not running", self.spec.name);
            }
        };

        // Snapshot descendants before signalling, parents die first and
        // orphan the rest otherwise.
        let mut targets = descendant_pids(root).await;
        targets.push(root);

        for pid in &targets {
            send_signal(*pid, SIGTERM);
        }

        let total = targets.len();
        let mut remaining = targets;
        for _ in 0..STOP_POLL_ROUNDS {
            remaining.retain(|pid| process_alive(*pid));
            if remaining.is_empty() {
                break;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        let killed = remaining.len();
        for pid in &remaining {
            send_signal(*pid, SIGKILL);
        }
        let _ = std::fs::remove_file(&self.spec.pid_file);

        Ok(StopOutcome {
            terminated: total - killed,
            killed,
        })
    }
}

/// Builds the detach wrapper: cd, export overrides, nohup with appended
/// logs, pid captured into the pidfile.
fn launch_script(spec: &DaemonSpec) -> String {
    let mut exports = String::new();
    let mut keys: Vec<_> = spec.env.keys().collect();
    keys.sort();
    for key in keys {
        exports.push_str(&format!("export {}=\"{}\"; ", key, spec.env[key]));
    }
    format!(
        "cd {} && {}nohup {} >> {} 2>&1 & echo $! > {}",
        spec.cwd.display(),
        exports,
        spec.command,
        spec.log_file.display(),
        spec.pid_file.display(),
    )
}

/// Collects every descendant of `root`, depth first, via `pgrep -P`.
async fn descendant_pids(root: i32) -> Vec<i32> {
    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        let out = match exec::run("pgrep", &["-P", &parent.to_string()], None, None).await {
            Ok(out) => out,
            Err(_) => continue,
        };
        for line in out.stdout.lines() {
            if let Ok(pid) = line.trim().parse::<i32>() {
                found.push(pid);
                frontier.push(pid);
            }
        }
    }
    found
}

#[cfg(unix)]
pub const SIGTERM: i32 = libc::SIGTERM;
#[cfg(unix)]
pub const SIGKILL: i32 = libc::SIGKILL;
#[cfg(not(unix))]
pub const SIGTERM: i32 = 15;
#[cfg(not(unix))]
pub const SIGKILL: i32 = 9;

/// Signal 0 probes for existence without touching the process.
#[cfg(unix)]
pub fn process_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(unix)]
pub fn send_signal(pid: i32, signal: i32) {
    unsafe {
        libc::kill(pid, signal);
    }
}

#[cfg(not(unix))]
pub fn process_alive(_pid: i32) -> bool {
    false
}

#[cfg(not(unix))]
pub fn send_signal(_pid: i32, _signal: i32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_in(dir: &std::path::Path, command: &str) -> DaemonSpec {
        DaemonSpec {
            name: "svc".into(),
            command: command.into(),
            cwd: dir.to_path_buf(),
            env: HashMap::from([("PORT".to_string(), "4001".to_string())]),
            log_file: dir.join("svc.log"),
            pid_file: dir.join("svc.pid"),
        }
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("devdeck-daemon-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn launch_script_detaches_and_records_pid() {
        let dir = PathBuf::from("/tmp/app");
        let script = launch_script(&spec_in(&dir, "yarn dev"));
        assert!(script.starts_with("cd /tmp/app && "));
        assert!(script.contains("export PORT=\"4001\"; "));
        assert!(script.contains("nohup yarn dev >> /tmp/app/svc.log 2>&1"));
        assert!(script.ends_with("& echo $! > /tmp/app/svc.pid"));
    }

    #[test]
    fn stale_pidfile_is_cleaned_up() {
        let dir = scratch_dir("stale");
        let spec = spec_in(&dir, "true");
        std::fs::write(&spec.pid_file, "999999999\n").unwrap();
        let daemon = Daemon::new(spec.clone());
        assert!(!daemon.is_running());
        assert!(!spec.pid_file.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn start_and_stop_round_trip() {
        let dir = scratch_dir("roundtrip");
        let daemon = Daemon::new(spec_in(&dir, "sleep 30"));
        let pid = daemon.start().await.unwrap();
        assert!(process_alive(pid));
        assert!(daemon.is_running());

        let outcome = daemon.stop().await.unwrap();
        assert_eq!(outcome.killed, 0);
        assert!(!daemon.is_running());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn double_start_is_refused() {
        let dir = scratch_dir("double");
        let daemon = Daemon::new(spec_in(&dir, "sleep 30"));
        daemon.start().await.unwrap();
        let err = daemon.start().await.unwrap_err();
        assert!(err.to_string().contains("already running"));
        daemon.stop().await.unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
