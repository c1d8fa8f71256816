//! Listener scanning and port cleanup.
//!
//! Scans for processes holding the ports the app cares about, preferring
//! `ss` and falling back to `lsof` where ss is unavailable (macOS). Both
//! outputs are plain text tables, parsed with regexes.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;

use crate::daemon::{process_alive, send_signal, SIGKILL, SIGTERM};
use crate::exec;

/// A service's port allocation: `base` plus `range` consecutive ports.
#[derive(Debug, Clone)]
pub struct MonitoredPort {
    pub service: String,
    pub base: u16,
    pub range: u16,
    pub group: String,
}

/// A live listener on a monitored port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerInfo {
    pub port: u16,
    pub pid: Option<i32>,
    pub process: String,
    pub service: String,
    pub group: String,
}

/// How a kill request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillResult {
    /// Exited after SIGTERM.
    Terminated,
    /// Needed SIGKILL.
    Killed,
    /// Was already gone.
    Gone,
}

pub struct PortScanner {
    lookup: HashMap<u16, (String, String)>,
}

impl PortScanner {
    pub fn new(monitored: &[MonitoredPort]) -> Self {
        let mut lookup = HashMap::new();
        for entry in monitored {
            for port in entry.base..=entry.base.saturating_add(entry.range) {
                lookup.insert(port, (entry.service.clone(), entry.group.clone()));
            }
        }
        Self { lookup }
    }

    /// Scans for listeners on monitored ports, backend group first.
    pub async fn scan(&self) -> Result<Vec<ListenerInfo>> {
        let ss = exec::run("ss", &["-tlnp"], None, None).await;
        let mut listeners = match ss {
            Ok(out) if out.ok() => self.parse_ss(&out.stdout),
            _ => {
                let lsof = exec::run(
                    "lsof",
                    &["-iTCP", "-sTCP:LISTEN", "-n", "-P"],
                    None,
                    None,
                )
                .await?;
                self.parse_lsof(&lsof.stdout)
            }
        };
        listeners.sort_by_key(|l| (l.group != "backend", l.port));
        Ok(listeners)
    }

    fn parse_ss(&self, text: &str) -> Vec<ListenerInfo> {
        let pid_re = Regex::new(r"pid=(\d+)").unwrap();
        let name_re = Regex::new(r#"\(\("([^"]+)""#).unwrap();
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for line in text.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                continue;
            }
            let Some(port) = port_of(fields[3]) else { continue };
            let Some((service, group)) = self.lookup.get(&port) else { continue };
            let pid = pid_re
                .captures(line)
                .and_then(|c| c[1].parse().ok());
            let process = name_re
                .captures(line)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| "?".to_string());
            if seen.contains(&(port, pid)) {
                continue;
            }
            seen.push((port, pid));
            out.push(ListenerInfo {
                port,
                pid,
                process,
                service: service.clone(),
                group: group.clone(),
            });
        }
        out
    }

    fn parse_lsof(&self, text: &str) -> Vec<ListenerInfo> {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for line in text.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 9 {
                continue;
            }
            let Some(addr) = fields.iter().rev().find(|f| f.contains(':')) else {
                continue;
            };
            let Some(port) = port_of(addr) else { continue };
            let Some((service, group)) = self.lookup.get(&port) else { continue };
            let pid = fields[1].parse().ok();
            if seen.contains(&(port, pid)) {
                continue;
            }
            seen.push((port, pid));
            out.push(ListenerInfo {
                port,
                pid,
                process: fields[0].to_string(),
                service: service.clone(),
                group: group.clone(),
            });
        }
        out
    }
}

fn port_of(addr: &str) -> Option<u16> {
    addr.rsplit(':').next()?.parse().ok()
}

/// Escalating kill: SIGTERM, wait up to 3s, then SIGKILL.
pub async fn kill_pid(pid: i32) -> KillResult {
    if !process_alive(pid) {
        return KillResult::Gone;
    }
    send_signal(pid, SIGTERM);
    for _ in 0..30 {
        if !process_alive(pid) {
            return KillResult::Terminated;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    send_signal(pid, SIGKILL);
    KillResult::Killed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> PortScanner {
        PortScanner::new(&[
            MonitoredPort {
                service: "api".into(),
                base: 4000,
                range: 2,
                group: "backend".into(),
            },
            MonitoredPort {
                service: "web".into(),
                base: 3000,
                range: 0,
                group: "frontend".into(),
            },
        ])
    }

    #[test]
    fn ss_output_is_parsed_and_filtered() {
        let text = "\
State  Recv-Q Send-Q Local Address:Port Peer Address:Port Process
LISTEN 0      511    *:3000            *:*               users:((\"node\",pid=1234,fd=23))
LISTEN 0      511    0.0.0.0:4001      0.0.0.0:*         users:((\"gunicorn\",pid=888,fd=5))
LISTEN 0      128    127.0.0.1:5432    0.0.0.0:*         users:((\"postgres\",pid=77,fd=3))
";
        let listeners = scanner().parse_ss(text);
        assert_eq!(listeners.len(), 2);
        let api = listeners.iter().find(|l| l.port == 4001).unwrap();
        assert_eq!(api.pid, Some(888));
        assert_eq!(api.process, "gunicorn");
        assert_eq!(api.service, "api");
        assert_eq!(api.group, "backend");
    }

    #[test]
    fn duplicate_port_pid_pairs_collapse() {
        let text = "\
State  Recv-Q Send-Q Local Address:Port Peer Address:Port Process
LISTEN 0      511    0.0.0.0:3000      0.0.0.0:*         users:((\"node\",pid=1,fd=1))
LISTEN 0      511    [::]:3000         [::]:*            users:((\"node\",pid=1,fd=2))
";
        let listeners = scanner().parse_ss(text);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn lsof_fallback_parses_command_and_pid() {
        let text = "\
COMMAND  PID USER   FD   TYPE DEVICE SIZE/OFF NODE NAME
node    4242 dev   23u  IPv4 0x1     0t0      TCP  *:3000 (LISTEN)
python  9001 dev    5u  IPv4 0x2     0t0      TCP  127.0.0.1:4002 (LISTEN)
";
        let listeners = scanner().parse_lsof(text);
        assert_eq!(listeners.len(), 2);
        let web = listeners.iter().find(|l| l.port == 3000).unwrap();
        assert_eq!(web.process, "node");
        assert_eq!(web.pid, Some(4242));
    }

    #[test]
    fn backend_group_sorts_first() {
        let mut listeners = vec![
            ListenerInfo {
                port: 3000,
                pid: None,
                process: "node".into(),
                service: "web".into(),
                group: "frontend".into(),
            },
            ListenerInfo {
                port: 4000,
                pid: None,
                process: "gunicorn".into(),
                service: "api".into(),
                group: "backend".into(),
            },
        ];
        listeners.sort_by_key(|l| (l.group != "backend", l.port));
        assert_eq!(listeners[0].port, 4000);
    }

    #[tokio::test]
    async fn kill_pid_reports_missing_process() {
        assert_eq!(kill_pid(999_999_999).await, KillResult::Gone);
    }
}
