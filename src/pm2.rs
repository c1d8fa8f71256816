//! PM2 process-manager wrapper.
//!
//! State comes from `pm2 jlist`, which dumps every managed process as JSON.
//! Only the handful of fields the status table needs are deserialized.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::events::{Event, PanelKind};
use crate::exec;

/// A PM2-managed process, flattened for display.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub name: String,
    pub status: String,
    pub pid: Option<u32>,
    pub memory_mb: f64,
    pub cpu: f64,
    pub uptime: String,
    pub restarts: u64,
}

impl ProcessInfo {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}

#[derive(Deserialize)]
struct RawProcess {
    name: String,
    pid: Option<u32>,
    pm2_env: RawEnv,
    monit: Option<RawMonit>,
}

#[derive(Deserialize)]
struct RawEnv {
    status: String,
    pm_uptime: Option<i64>,
    #[serde(default)]
    restart_time: u64,
}

#[derive(Deserialize)]
struct RawMonit {
    memory: Option<u64>,
    cpu: Option<f64>,
}

/// Parses `pm2 jlist` output.
pub fn parse_jlist(json: &str, now_ms: i64) -> Result<Vec<ProcessInfo>> {
    let raw: Vec<RawProcess> = serde_json::from_str(json).context("unexpected pm2 jlist output")?;
    Ok(raw
        .into_iter()
        .map(|p| {
            let online = p.pm2_env.status == "online";
            let uptime = match (online, p.pm2_env.pm_uptime) {
                (true, Some(since)) => format_uptime(now_ms.saturating_sub(since)),
                _ => "-".to_string(),
            };
            let monit = p.monit.unwrap_or(RawMonit {
                memory: None,
                cpu: None,
            });
            ProcessInfo {
                name: p.name,
                status: p.pm2_env.status,
                pid: p.pid.filter(|_| online),
                memory_mb: monit.memory.unwrap_or(0) as f64 / (1024.0 * 1024.0),
                cpu: monit.cpu.unwrap_or(0.0),
                uptime,
                restarts: p.pm2_env.restart_time,
            }
        })
        .collect())
}

/// Formats an uptime in milliseconds as `37s`, `12m`, `3h`, `2d`.
pub fn format_uptime(elapsed_ms: i64) -> String {
    let secs = (elapsed_ms / 1000).max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

/// Resolves a user-typed shorthand against the configured alias map.
pub fn resolve_name(aliases: &HashMap<String, String>, input: &str) -> String {
    aliases
        .get(input)
        .cloned()
        .unwrap_or_else(|| input.to_string())
}

#[derive(Debug, Clone)]
pub struct Pm2Service {
    /// Directory containing ecosystem.config.js.
    cwd: PathBuf,
}

impl Pm2Service {
    pub fn new(cwd: PathBuf) -> Self {
        Self { cwd }
    }

    async fn pm2(&self, args: &[&str]) -> Result<exec::CmdOutput> {
        exec::run("pm2", args, Some(&self.cwd), None).await
    }

    pub async fn list(&self) -> Result<Vec<ProcessInfo>> {
        let out = self.pm2(&["jlist"]).await?;
        if !out.ok() {
            bail!("pm2 jlist failed: {}", out.stderr.trim());
        }
        parse_jlist(&out.stdout, chrono::Utc::now().timestamp_millis())
    }

    /// Starts one app from the ecosystem file, or all of them.
    pub async fn start(&self, name: &str) -> Result<exec::CmdOutput> {
        if name == "all" {
            self.pm2(&["start", "ecosystem.config.js"]).await
        } else {
            self.pm2(&["start", "ecosystem.config.js", "--only", name]).await
        }
    }

    pub async fn stop(&self, name: &str) -> Result<exec::CmdOutput> {
        self.pm2(&["stop", name]).await
    }

    pub async fn restart(&self, name: &str) -> Result<exec::CmdOutput> {
        self.pm2(&["restart", name]).await
    }

    pub async fn delete(&self, name: &str) -> Result<exec::CmdOutput> {
        self.pm2(&["delete", name]).await
    }

    pub async fn flush(&self) -> Result<exec::CmdOutput> {
        self.pm2(&["flush"]).await
    }

    /// Streams raw log output for one process (or everything) into a panel.
    pub async fn stream_logs(
        &self,
        name: Option<&str>,
        lines: u32,
        tx: &mpsc::Sender<Event>,
        panel: PanelKind,
    ) -> Result<i32> {
        let lines_arg = lines.to_string();
        let mut args = vec!["logs"];
        if let Some(name) = name {
            args.push(name);
        }
        args.extend(["--raw", "--lines", &lines_arg]);
        exec::stream("pm2", &args, Some(&self.cwd), None, tx, panel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {
            "name": "web",
            "pid": 3101,
            "pm2_env": {"status": "online", "pm_uptime": 1000, "restart_time": 4},
            "monit": {"memory": 157286400, "cpu": 2.5}
        },
        {
            "name": "worker",
            "pid": 0,
            "pm2_env": {"status": "stopped", "pm_uptime": null},
            "monit": {"memory": 0, "cpu": 0}
        }
    ]"#;

    #[test]
    fn jlist_flattens_nested_fields() {
        let procs = parse_jlist(SAMPLE, 61_000).unwrap();
        assert_eq!(procs.len(), 2);

        let web = &procs[0];
        assert_eq!(web.name, "web");
        assert!(web.is_online());
        assert_eq!(web.pid, Some(3101));
        assert_eq!(web.memory_mb, 150.0);
        assert_eq!(web.cpu, 2.5);
        assert_eq!(web.uptime, "1m");
        assert_eq!(web.restarts, 4);

        let worker = &procs[1];
        assert!(!worker.is_online());
        assert_eq!(worker.pid, None);
        assert_eq!(worker.uptime, "-");
        assert_eq!(worker.restarts, 0);
    }

    #[test]
    fn uptime_scales_through_units() {
        assert_eq!(format_uptime(5_000), "5s");
        assert_eq!(format_uptime(180_000), "3m");
        assert_eq!(format_uptime(7_200_000), "2h");
        assert_eq!(format_uptime(172_800_000), "2d");
        assert_eq!(format_uptime(-50), "0s");
    }

    #[test]
    fn aliases_fall_through_to_input() {
        let aliases = HashMap::from([("web".to_string(), "petehome-web".to_string())]);
        assert_eq!(resolve_name(&aliases, "web"), "petehome-web");
        assert_eq!(resolve_name(&aliases, "petehome-api"), "petehome-api");
    }
}
