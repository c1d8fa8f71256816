//! Per-app profiles.
//!
//! The two binaries share one runtime; everything that differs between
//! them — repo roots, managed services, monitored ports, credentials — is
//! collected here. Values come from environment variables with defaults
//! that match the standard checkout layout.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::auth::AuthConfig;
use crate::daemon::DaemonSpec;
use crate::envfile::EnvPresets;
use crate::events::PanelKind;
use crate::git::GitService;
use crate::ports::MonitoredPort;

#[derive(Debug, Clone)]
pub struct Pm2Config {
    /// Directory containing ecosystem.config.js.
    pub cwd: PathBuf,
    /// Shorthand -> pm2 app name.
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct VercelConfig {
    pub token: Option<String>,
    pub project_id: Option<String>,
    pub team_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MigrateConfig {
    pub db_url: Option<String>,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub app_name: &'static str,
    /// `~/.{app}` — settings, token cache, pidfiles, log files.
    pub state_dir: PathBuf,
    /// Repo label -> checkout root. The first entry is the default for
    /// git commands.
    pub repos: Vec<(String, PathBuf)>,
    pub monitored_ports: Vec<MonitoredPort>,
    /// Detached services managed by up/down.
    pub daemons: Vec<DaemonSpec>,
    /// Log files tailed into panels.
    pub tail_logs: Vec<(PanelKind, PathBuf)>,
    /// Whether this app has a separate frontend log panel.
    pub split_service_logs: bool,
    pub env: Option<EnvPresets>,
    pub auth: Option<AuthConfig>,
    pub pm2: Option<Pm2Config>,
    pub vercel: Option<VercelConfig>,
    pub migrate: Option<MigrateConfig>,
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn env_or(var: &str, default: PathBuf) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or(default)
}

impl Profile {
    pub fn armhr() -> Self {
        let state_dir = home().join(".armhr");
        let backend_root = env_or("ARMHR_BACKEND_ROOT", home().join("code/armhr/backend"));
        let frontend_root = env_or("ARMHR_FRONTEND_ROOT", home().join("code/armhr/frontend"));
        let logs_dir = state_dir.join("logs");

        let backend_cmd =
            std::env::var("ARMHR_BACKEND_CMD").unwrap_or_else(|_| "make dev".to_string());
        let frontend_cmd =
            std::env::var("ARMHR_FRONTEND_CMD").unwrap_or_else(|_| "yarn dev".to_string());

        let daemons = vec![
            DaemonSpec {
                name: "backend".to_string(),
                command: backend_cmd,
                cwd: backend_root.clone(),
                env: HashMap::new(),
                log_file: logs_dir.join("backend.log"),
                pid_file: state_dir.join("backend.pid"),
            },
            DaemonSpec {
                name: "frontend".to_string(),
                command: frontend_cmd,
                cwd: frontend_root.clone(),
                env: HashMap::new(),
                log_file: logs_dir.join("frontend.log"),
                pid_file: state_dir.join("frontend.pid"),
            },
        ];
        let tail_logs = vec![
            (PanelKind::Backend, logs_dir.join("backend.log")),
            (PanelKind::Frontend, logs_dir.join("frontend.log")),
        ];

        Self {
            app_name: "armhr",
            repos: vec![
                ("backend".to_string(), backend_root.clone()),
                ("frontend".to_string(), frontend_root),
            ],
            monitored_ports: vec![
                MonitoredPort {
                    service: "api".to_string(),
                    base: 8000,
                    range: 4,
                    group: "backend".to_string(),
                },
                MonitoredPort {
                    service: "web".to_string(),
                    base: 3000,
                    range: 1,
                    group: "frontend".to_string(),
                },
            ],
            daemons,
            tail_logs,
            split_service_logs: true,
            env: Some(EnvPresets::new(
                env_or("ARMHR_ENV_FILE", backend_root.join(".env")),
                state_dir.join("presets.toml"),
                state_dir.join("backups"),
            )),
            auth: Some(AuthConfig {
                domain: std::env::var("ARMHR_AUTH0_DOMAIN").ok(),
                client_id: std::env::var("ARMHR_AUTH0_CLIENT_ID").ok(),
                audience: std::env::var("ARMHR_AUTH0_AUDIENCE").ok(),
                cache_path: state_dir.join("auth_token.json"),
            }),
            pm2: None,
            vercel: None,
            migrate: None,
            state_dir,
        }
    }

    pub fn petehome() -> Self {
        let state_dir = home().join(".petehome");
        let root = env_or("PETEHOME_ROOT", home().join("code/petehome"));

        let aliases = HashMap::from([
            ("web".to_string(), "petehome-web".to_string()),
            ("api".to_string(), "petehome-api".to_string()),
            ("worker".to_string(), "petehome-worker".to_string()),
        ]);

        Self {
            app_name: "petehome",
            repos: vec![("petehome".to_string(), root.clone())],
            monitored_ports: vec![
                MonitoredPort {
                    service: "web".to_string(),
                    base: 3000,
                    range: 0,
                    group: "frontend".to_string(),
                },
                MonitoredPort {
                    service: "supabase".to_string(),
                    base: 54321,
                    range: 8,
                    group: "backend".to_string(),
                },
            ],
            daemons: Vec::new(),
            tail_logs: Vec::new(),
            split_service_logs: false,
            env: None,
            auth: None,
            pm2: Some(Pm2Config {
                cwd: root.clone(),
                aliases,
            }),
            vercel: Some(VercelConfig {
                token: std::env::var("VERCEL_TOKEN").ok(),
                project_id: std::env::var("VERCEL_PROJECT_ID").ok(),
                team_id: std::env::var("VERCEL_TEAM_ID").ok(),
            }),
            migrate: Some(MigrateConfig {
                db_url: std::env::var("DATABASE_URL")
                    .or_else(|_| std::env::var("SUPABASE_DB_URL"))
                    .ok(),
                dir: env_or("PETEHOME_MIGRATIONS_DIR", root.join("supabase/migrations")),
            }),
            state_dir,
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.state_dir.join("settings.toml")
    }

    /// Git service for a repo by label, defaulting to the first repo.
    pub fn git(&self, repo: Option<&str>) -> Result<GitService> {
        match repo {
            None => {
                let (label, root) = &self.repos[0];
                Ok(GitService::new(root.clone(), label.clone()))
            }
            Some(wanted) => {
                for (label, root) in &self.repos {
                    if label == wanted {
                        return Ok(GitService::new(root.clone(), label.clone()));
                    }
                }
                let known = self
                    .repos
                    .iter()
                    .map(|(l, _)| l.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                bail!("unknown repo '{wanted}' (known: {known})");
            }
        }
    }

    pub fn daemon_named(&self, name: &str) -> Option<&DaemonSpec> {
        self.daemons.iter().find(|d| d.name == name)
    }
}

/// Resolves up/down shorthands: be/backend, fe/frontend, empty = all.
pub fn resolve_daemon_targets<'a>(profile: &'a Profile, arg: Option<&str>) -> Result<Vec<&'a DaemonSpec>> {
    match arg {
        None | Some("all") => Ok(profile.daemons.iter().collect()),
        Some(raw) => {
            let name = match raw {
                "be" => "backend",
                "fe" => "frontend",
                other => other,
            };
            match profile.daemon_named(name) {
                Some(spec) => Ok(vec![spec]),
                None => bail!("unknown service '{raw}' (backend/be, frontend/fe, all)"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armhr_profile_wires_both_repos() {
        let profile = Profile::armhr();
        assert_eq!(profile.repos.len(), 2);
        assert!(profile.env.is_some());
        assert!(profile.auth.is_some());
        assert!(profile.pm2.is_none());
        assert!(profile.split_service_logs);
        assert_eq!(profile.daemons.len(), 2);
        assert_eq!(profile.tail_logs.len(), 2);
    }

    #[test]
    fn petehome_profile_wires_pm2_and_vercel() {
        let profile = Profile::petehome();
        assert_eq!(profile.repos.len(), 1);
        assert!(profile.pm2.is_some());
        assert!(profile.vercel.is_some());
        assert!(profile.migrate.is_some());
        assert!(profile.daemons.is_empty());
        assert!(!profile.split_service_logs);
    }

    #[test]
    fn daemon_shorthands_resolve() {
        let profile = Profile::armhr();
        let all = resolve_daemon_targets(&profile, None).unwrap();
        assert_eq!(all.len(), 2);
        let be = resolve_daemon_targets(&profile, Some("be")).unwrap();
        assert_eq!(be[0].name, "backend");
        assert!(resolve_daemon_targets(&profile, Some("db")).is_err());
    }

    #[test]
    fn unknown_repo_is_an_error() {
        let profile = Profile::petehome();
        assert!(profile.git(Some("backend")).is_err());
        assert_eq!(profile.git(None).unwrap().repo_label(), "petehome");
    }
}
