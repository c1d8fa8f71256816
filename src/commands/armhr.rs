//! armhr-specific commands: daemon lifecycle, env presets, auth, ports.

use anyhow::{bail, Context, Result};

use crate::auth::AuthService;
use crate::daemon::Daemon;
use crate::envfile::{EnvPresets, GROUP_PREFIXES};
use crate::output::StatusLevel;
use crate::ports::{kill_pid, KillResult, PortScanner};
use crate::profile::resolve_daemon_targets;

use super::{CmdContext, CommandDef, Registry};

pub fn register(registry: &mut Registry) {
    registry.register(CommandDef {
        name: "up",
        aliases: &["start"],
        usage: "up [be|fe|all]",
        summary: "start the dev servers",
        section: "Services",
        run: |ctx, args| Box::pin(up(ctx, args)),
    });
    registry.register(CommandDef {
        name: "down",
        aliases: &["stop"],
        usage: "down [be|fe|all]",
        summary: "stop the dev servers",
        section: "Services",
        run: |ctx, args| Box::pin(down(ctx, args)),
    });
    registry.register(CommandDef {
        name: "status",
        aliases: &["s"],
        usage: "status",
        summary: "show service and port status",
        section: "Services",
        run: |ctx, args| Box::pin(status(ctx, args)),
    });
    registry.register(CommandDef {
        name: "restart",
        aliases: &[],
        usage: "restart [be|fe|all]",
        summary: "stop then start the dev servers",
        section: "Services",
        run: |ctx, args| Box::pin(restart(ctx, args)),
    });
    registry.register(CommandDef {
        name: "env",
        aliases: &[],
        usage: "env [list|swap|full|seed]",
        summary: "inspect and swap .env presets",
        section: "Environment",
        run: |ctx, args| Box::pin(env(ctx, args)),
    });
    registry.register(CommandDef {
        name: "auth",
        aliases: &[],
        usage: "auth [login|logout|status|token]",
        summary: "manage the Auth0 session",
        section: "Auth",
        run: |ctx, args| Box::pin(auth(ctx, args)),
    });
    registry.register(CommandDef {
        name: "ports",
        aliases: &[],
        usage: "ports",
        summary: "list listeners on monitored ports",
        section: "Ports",
        run: |ctx, args| Box::pin(ports(ctx, args)),
    });
    registry.register(CommandDef {
        name: "cleanup",
        aliases: &["killports"],
        usage: "cleanup [backend|frontend]",
        summary: "kill processes holding monitored ports",
        section: "Ports",
        run: |ctx, args| Box::pin(cleanup(ctx, args)),
    });
}

async fn up(ctx: CmdContext, args: Vec<String>) -> Result<()> {
    let targets = resolve_daemon_targets(&ctx.profile, args.first().map(String::as_str))?;
    for spec in targets {
        let daemon = Daemon::new(spec.clone());
        ctx.say(format!("starting {}...", daemon.name())).await;
        match daemon.start().await {
            Ok(pid) => {
                ctx.say(format!("{} up (pid {pid})", daemon.name())).await;
                ctx.status(StatusLevel::Success, format!("{} started", daemon.name()))
                    .await;
            }
            Err(e) => {
                ctx.status(StatusLevel::Error, e.to_string()).await;
            }
        }
    }
    ctx.refresh_bars().await;
    Ok(())
}

async fn down(ctx: CmdContext, args: Vec<String>) -> Result<()> {
    let targets = resolve_daemon_targets(&ctx.profile, args.first().map(String::as_str))?;
    for spec in targets {
        let daemon = Daemon::new(spec.clone());
        match daemon.stop().await {
            Ok(outcome) => {
                let mut detail = format!("{} terminated", outcome.terminated);
                if outcome.killed > 0 {
                    detail.push_str(&format!(", {} force-killed", outcome.killed));
                }
                ctx.say(format!("{} stopped ({detail})", daemon.name())).await;
            }
            Err(e) => ctx.say(format!("{}: {e}", daemon.name())).await,
        }
    }
    ctx.status(StatusLevel::Info, "down complete").await;
    ctx.refresh_bars().await;
    Ok(())
}

async fn restart(ctx: CmdContext, args: Vec<String>) -> Result<()> {
    down(ctx.clone(), args.clone()).await?;
    up(ctx, args).await
}

async fn status(ctx: CmdContext, _args: Vec<String>) -> Result<()> {
    for spec in &ctx.profile.daemons {
        let st = Daemon::new(spec.clone()).status();
        let line = if st.running {
            format!("● {} running (pid {})", st.name, st.pid.unwrap_or(0))
        } else {
            format!("○ {} stopped", st.name)
        };
        ctx.say(line).await;
    }

    let scanner = PortScanner::new(&ctx.profile.monitored_ports);
    let listeners = scanner.scan().await?;
    if listeners.is_empty() {
        ctx.say("no listeners on monitored ports").await;
        return Ok(());
    }
    ctx.say("").await;
    ctx.say("listeners:").await;
    for l in listeners {
        let pid = l.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into());
        ctx.say(format!("  :{} {} (pid {pid}, {})", l.port, l.process, l.service))
            .await;
    }
    Ok(())
}

fn env_presets(ctx: &CmdContext) -> Result<EnvPresets> {
    ctx.profile
        .env
        .clone()
        .context("env presets are not configured for this app")
}

async fn env(ctx: CmdContext, args: Vec<String>) -> Result<()> {
    let presets = env_presets(&ctx)?;
    match args.first().map(String::as_str) {
        None | Some("show") => {
            for (group, _) in GROUP_PREFIXES {
                let (active, detail) = presets.identify_active(group);
                match detail {
                    Some(detail) => ctx.say(format!("{group:<8} {active}  ({detail})")).await,
                    None => ctx.say(format!("{group:<8} {active}")).await,
                }
            }
            if let Some(full) = presets.identify_active_full() {
                ctx.say(format!("full     {full}")).await;
            }
            Ok(())
        }
        Some("list") => {
            let by_group = presets.list_presets();
            if by_group.is_empty() {
                ctx.say("no presets defined; run env seed to bootstrap").await;
                return Ok(());
            }
            for (group, names) in by_group {
                ctx.say(format!("{group}: {}", names.join(", "))).await;
            }
            let full = presets.load_full_presets();
            if !full.is_empty() {
                let names: Vec<String> = full.keys().cloned().collect();
                ctx.say(format!("full: {}", names.join(", "))).await;
            }
            Ok(())
        }
        Some("swap") => {
            let (group, name) = match (args.get(1), args.get(2)) {
                (Some(g), Some(n)) => (g.clone(), n.clone()),
                _ => bail!("usage: env swap <group> <preset>"),
            };
            let summary = presets.swap_group(&group, &name)?;
            ctx.say(summary).await;
            ctx.status(StatusLevel::Success, format!("{group} -> {name}")).await;
            ctx.refresh_bars().await;
            Ok(())
        }
        Some("full") => {
            let name = args.get(1).context("usage: env full <preset>")?;
            let full = presets.load_full_presets();
            let Some(mapping) = full.get(name) else {
                let known: Vec<String> = full.keys().cloned().collect();
                bail!("unknown full preset '{name}' (known: {})", known.join(", "));
            };
            for (group, preset) in mapping {
                let summary = presets.swap_group(group, preset)?;
                ctx.say(summary).await;
            }
            ctx.status(StatusLevel::Success, format!("applied {name}")).await;
            ctx.refresh_bars().await;
            Ok(())
        }
        Some("seed") => {
            let summary = presets.seed_presets()?;
            ctx.say(summary).await;
            ctx.status(StatusLevel::Success, "presets seeded").await;
            Ok(())
        }
        Some(other) => bail!("unknown env subcommand '{other}' (show, list, swap, full, seed)"),
    }
}

async fn auth(ctx: CmdContext, args: Vec<String>) -> Result<()> {
    let config = ctx
        .profile
        .auth
        .clone()
        .context("auth is not configured for this app")?;
    let service = AuthService::new(config);
    match args.first().map(String::as_str) {
        None | Some("status") => {
            let st = service.status();
            if !st.configured {
                ctx.say("auth not configured (set ARMHR_AUTH0_DOMAIN / ARMHR_AUTH0_CLIENT_ID)")
                    .await;
                return Ok(());
            }
            let domain = st.domain.unwrap_or_default();
            if st.logged_in {
                let mins = st.expires_in.unwrap_or(0) / 60;
                ctx.say(format!("logged in to {domain}, token valid {mins}m"))
                    .await;
            } else {
                ctx.say(format!("not logged in ({domain})")).await;
            }
            Ok(())
        }
        Some("login") => {
            ctx.say("opening browser for login...").await;
            let summary = service.login().await?;
            ctx.say(summary).await;
            ctx.status(StatusLevel::Success, "logged in").await;
            ctx.refresh_bars().await;
            Ok(())
        }
        Some("logout") => {
            let summary = service.logout()?;
            ctx.say(summary).await;
            ctx.refresh_bars().await;
            Ok(())
        }
        Some("token") => match args.get(1) {
            Some(token) => {
                let summary = service.manual_token(token, None)?;
                ctx.say(summary).await;
                ctx.refresh_bars().await;
                Ok(())
            }
            None => {
                // Bare `auth token` prints the current token for curl use.
                match service.get_valid_token().await? {
                    Some(token) => ctx.say(token).await,
                    None => ctx.say("no valid token; run auth login").await,
                }
                Ok(())
            }
        },
        Some(other) => bail!("unknown auth subcommand '{other}' (status, login, logout, token)"),
    }
}

async fn ports(ctx: CmdContext, _args: Vec<String>) -> Result<()> {
    let scanner = PortScanner::new(&ctx.profile.monitored_ports);
    let listeners = scanner.scan().await?;
    if listeners.is_empty() {
        ctx.say("no listeners on monitored ports").await;
        return Ok(());
    }
    for l in listeners {
        let pid = l.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into());
        ctx.say(format!(
            "[{}] :{} {} (pid {pid}, {})",
            l.group, l.port, l.process, l.service
        ))
        .await;
    }
    Ok(())
}

async fn cleanup(ctx: CmdContext, args: Vec<String>) -> Result<()> {
    let group_filter = args.first().map(String::as_str);
    let scanner = PortScanner::new(&ctx.profile.monitored_ports);
    let listeners = scanner.scan().await?;
    let targets: Vec<_> = listeners
        .into_iter()
        .filter(|l| group_filter.is_none_or(|g| l.group == g))
        .collect();
    if targets.is_empty() {
        ctx.say("nothing to clean up").await;
        return Ok(());
    }
    let mut cleaned = 0;
    for l in targets {
        let Some(pid) = l.pid else {
            ctx.say(format!(":{} {} has no visible pid, skipped", l.port, l.process))
                .await;
            continue;
        };
        let result = kill_pid(pid).await;
        let verb = match result {
            KillResult::Terminated => "terminated",
            KillResult::Killed => "force-killed",
            KillResult::Gone => "already gone",
        };
        ctx.say(format!(":{} {} (pid {pid}) {verb}", l.port, l.process))
            .await;
        cleaned += 1;
    }
    ctx.status(StatusLevel::Success, format!("cleaned {cleaned} listener(s)"))
        .await;
    Ok(())
}
