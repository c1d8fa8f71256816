//! petehome-specific commands: pm2 processes, project scripts, Vercel
//! deploys, and supabase migrations.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::events::PanelKind;
use crate::exec;
use crate::migrate::MigrationRunner;
use crate::output::StatusLevel;
use crate::pm2::{resolve_name, Pm2Service};
use crate::ports::PortScanner;
use crate::vercel::VercelService;

use super::{CmdContext, CommandDef, Registry};

const LOG_TAIL_LINES: u32 = 60;
const DEPLOY_HISTORY_DEFAULT: usize = 5;

pub fn register(registry: &mut Registry) {
    registry.register(CommandDef {
        name: "status",
        aliases: &["s"],
        usage: "status",
        summary: "pm2 process table and port status",
        section: "Services",
        run: |ctx, args| Box::pin(status(ctx, args)),
    });
    registry.register(CommandDef {
        name: "pm2",
        aliases: &[],
        usage: "pm2 <sub> [name]",
        summary: "start, stop, restart, logs, flush, delete",
        section: "Services",
        run: |ctx, args| Box::pin(pm2(ctx, args)),
    });
    registry.register(CommandDef {
        name: "logs",
        aliases: &[],
        usage: "logs [name]",
        summary: "stream pm2 logs",
        section: "Services",
        run: |ctx, args| Box::pin(logs(ctx, args)),
    });
    registry.register(CommandDef {
        name: "lint",
        aliases: &[],
        usage: "lint",
        summary: "run the linter",
        section: "Scripts",
        run: |ctx, _| Box::pin(script(ctx, "lint")),
    });
    registry.register(CommandDef {
        name: "format",
        aliases: &["fmt"],
        usage: "format",
        summary: "run the formatter",
        section: "Scripts",
        run: |ctx, _| Box::pin(script(ctx, "format")),
    });
    registry.register(CommandDef {
        name: "build",
        aliases: &[],
        usage: "build",
        summary: "build the project",
        section: "Scripts",
        run: |ctx, _| Box::pin(script(ctx, "build")),
    });
    registry.register(CommandDef {
        name: "typecheck",
        aliases: &["tc"],
        usage: "typecheck",
        summary: "run the type checker",
        section: "Scripts",
        run: |ctx, _| Box::pin(script(ctx, "typecheck")),
    });
    registry.register(CommandDef {
        name: "clean",
        aliases: &[],
        usage: "clean",
        summary: "remove build artifacts",
        section: "Scripts",
        run: |ctx, _| Box::pin(script(ctx, "clean")),
    });
    registry.register(CommandDef {
        name: "sync",
        aliases: &[],
        usage: "sync",
        summary: "git pull and reinstall dependencies",
        section: "Scripts",
        run: |ctx, args| Box::pin(sync(ctx, args)),
    });
    registry.register(CommandDef {
        name: "deploy",
        aliases: &[],
        usage: "deploy [status|history|open|trigger]",
        summary: "inspect and trigger Vercel deployments",
        section: "Deploy",
        run: |ctx, args| Box::pin(deploy(ctx, args)),
    });
    registry.register(CommandDef {
        name: "migrate",
        aliases: &["db"],
        usage: "migrate [status|run|pending|mark]",
        summary: "run supabase migrations via psql",
        section: "Database",
        run: |ctx, args| Box::pin(migrate(ctx, args)),
    });
}

fn project_root(ctx: &CmdContext) -> PathBuf {
    ctx.profile.repos[0].1.clone()
}

fn pm2_service(ctx: &CmdContext) -> Result<(Pm2Service, std::collections::HashMap<String, String>)> {
    let config = ctx
        .profile
        .pm2
        .clone()
        .context("pm2 is not configured for this app")?;
    Ok((Pm2Service::new(config.cwd), config.aliases))
}

async fn status(ctx: CmdContext, _args: Vec<String>) -> Result<()> {
    let (service, _) = pm2_service(&ctx)?;
    let procs = service.list().await?;
    if procs.is_empty() {
        ctx.say("no pm2 processes; run pm2 start all").await;
    } else {
        ctx.say(format!(
            "  {:<18} {:<9} {:>7} {:>8} {:>6} {:>7} {:>9}",
            "name", "status", "pid", "mem", "cpu", "uptime", "restarts"
        ))
        .await;
        for p in &procs {
            let glyph = if p.is_online() { "●" } else { "○" };
            let pid = p.pid.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
            ctx.say(format!(
                "{glyph} {:<18} {:<9} {:>7} {:>7.1}M {:>5.1}% {:>7} {:>9}",
                p.name, p.status, pid, p.memory_mb, p.cpu, p.uptime, p.restarts
            ))
            .await;
        }
    }

    let scanner = PortScanner::new(&ctx.profile.monitored_ports);
    let listeners = scanner.scan().await?;
    if !listeners.is_empty() {
        ctx.say("").await;
        for l in listeners {
            let pid = l.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into());
            ctx.say(format!("  :{} {} (pid {pid}, {})", l.port, l.process, l.service))
                .await;
        }
    }
    Ok(())
}

async fn pm2(ctx: CmdContext, args: Vec<String>) -> Result<()> {
    let (service, aliases) = pm2_service(&ctx)?;
    let sub = args.first().map(String::as_str).unwrap_or("status");
    let target = args
        .get(1)
        .map(|raw| resolve_name(&aliases, raw))
        .unwrap_or_else(|| "all".to_string());

    let out = match sub {
        "status" | "list" => return status(ctx, Vec::new()).await,
        "start" => service.start(&target).await?,
        "stop" => service.stop(&target).await?,
        "restart" => service.restart(&target).await?,
        "delete" => service.delete(&target).await?,
        "flush" => service.flush().await?,
        "logs" => return logs(ctx, args[1..].to_vec()).await,
        other => bail!("unknown pm2 subcommand '{other}'"),
    };
    if !out.ok() {
        bail!("pm2 {sub} failed: {}", out.stderr.trim());
    }
    ctx.status(StatusLevel::Success, format!("pm2 {sub} {target} done"))
        .await;
    Ok(())
}

async fn logs(ctx: CmdContext, args: Vec<String>) -> Result<()> {
    let (service, aliases) = pm2_service(&ctx)?;
    let target = args.first().map(|raw| resolve_name(&aliases, raw));
    ctx.say(match &target {
        Some(name) => format!("streaming {name} logs, ctrl-c the pm2 child or run clear"),
        None => "streaming all pm2 logs".to_string(),
    })
    .await;
    service
        .stream_logs(target.as_deref(), LOG_TAIL_LINES, &ctx.tx, PanelKind::Output)
        .await?;
    Ok(())
}

/// Streams a package.json script to the output panel.
async fn script(ctx: CmdContext, name: &str) -> Result<()> {
    let root = project_root(&ctx);
    ctx.say(format!("$ yarn {name}")).await;
    let code = exec::stream("yarn", &[name], Some(&root), None, &ctx.tx, PanelKind::Output).await?;
    if code == 0 {
        ctx.status(StatusLevel::Success, format!("{name} passed")).await;
    } else {
        ctx.status(StatusLevel::Error, format!("{name} exited with {code}"))
            .await;
    }
    Ok(())
}

async fn sync(ctx: CmdContext, _args: Vec<String>) -> Result<()> {
    let root = project_root(&ctx);
    ctx.say("$ git pull").await;
    let code = exec::stream("git", &["pull"], Some(&root), None, &ctx.tx, PanelKind::Output).await?;
    if code != 0 {
        bail!("git pull exited with {code}");
    }
    ctx.say("$ yarn install").await;
    let code = exec::stream(
        "yarn",
        &["install"],
        Some(&root),
        None,
        &ctx.tx,
        PanelKind::Output,
    )
    .await?;
    if code != 0 {
        bail!("yarn install exited with {code}");
    }
    ctx.status(StatusLevel::Success, "synced").await;
    Ok(())
}

fn vercel_service(ctx: &CmdContext) -> Result<VercelService> {
    let config = ctx
        .profile
        .vercel
        .clone()
        .context("vercel is not configured for this app")?;
    let service = VercelService::new(config.token, config.project_id, config.team_id);
    if !service.is_configured() {
        bail!("set VERCEL_TOKEN and VERCEL_PROJECT_ID to use deploy commands");
    }
    Ok(service)
}

async fn deploy(ctx: CmdContext, args: Vec<String>) -> Result<()> {
    let service = vercel_service(&ctx)?;
    match args.first().map(String::as_str) {
        None | Some("status") => {
            match service.latest().await? {
                Some(d) => {
                    ctx.say(format!(
                        "{} {} ({})",
                        d.state.label(),
                        d.deployment_url(),
                        d.created_str()
                    ))
                    .await;
                }
                None => ctx.say("no deployments yet").await,
            }
            Ok(())
        }
        Some("history") => {
            let limit = args
                .get(1)
                .and_then(|n| n.parse().ok())
                .unwrap_or(DEPLOY_HISTORY_DEFAULT);
            let deployments = service.get_deployments(limit).await?;
            if deployments.is_empty() {
                ctx.say("no deployments yet").await;
                return Ok(());
            }
            for d in deployments {
                ctx.say(format!(
                    "{:<10} {}  {}",
                    d.state.label(),
                    d.created_str(),
                    d.deployment_url()
                ))
                .await;
            }
            Ok(())
        }
        Some("open") => {
            let Some(d) = service.latest().await? else {
                bail!("no deployments to open");
            };
            let url = d
                .inspector_url
                .clone()
                .unwrap_or_else(|| d.deployment_url());
            let opener = if cfg!(target_os = "macos") { "open" } else { "xdg-open" };
            let out = exec::run(opener, &[&url], None, None).await;
            match out {
                Ok(o) if o.ok() => ctx.say(format!("opened {url}")).await,
                _ => ctx.say(url).await,
            }
            Ok(())
        }
        Some("trigger") => {
            // Production deploys are too easy to fat-finger from a prompt.
            if args.get(1).map(String::as_str) != Some("--yes") {
                ctx.say("this deploys to production; run deploy trigger --yes to confirm")
                    .await;
                ctx.status(StatusLevel::Warn, "deploy not confirmed").await;
                return Ok(());
            }
            ctx.say("$ vercel --prod --yes").await;
            let code = service.trigger(&ctx.tx, PanelKind::Output).await?;
            if code == 0 {
                ctx.status(StatusLevel::Success, "deploy triggered").await;
            } else {
                ctx.status(StatusLevel::Error, format!("vercel exited with {code}"))
                    .await;
            }
            Ok(())
        }
        Some(other) => bail!("unknown deploy subcommand '{other}' (status, history, open, trigger)"),
    }
}

fn migration_runner(ctx: &CmdContext) -> Result<MigrationRunner> {
    let config = ctx
        .profile
        .migrate
        .clone()
        .context("migrations are not configured for this app")?;
    let db_url = config
        .db_url
        .context("set DATABASE_URL or SUPABASE_DB_URL to use migrate commands")?;
    Ok(MigrationRunner::new(db_url, config.dir))
}

async fn migrate(ctx: CmdContext, args: Vec<String>) -> Result<()> {
    let runner = migration_runner(&ctx)?;
    match args.first().map(String::as_str) {
        None | Some("status") => {
            let status = runner.status().await?;
            ctx.say(format!(
                "{} applied, {} pending",
                status.applied.len(),
                status.pending.len()
            ))
            .await;
            for version in &status.pending {
                ctx.say(format!("  pending: {version}")).await;
            }
            Ok(())
        }
        Some("pending") | Some("dry-run") => {
            let status = runner.status().await?;
            if status.pending.is_empty() {
                ctx.say("nothing to apply").await;
                return Ok(());
            }
            for version in &status.pending {
                ctx.say(format!("would apply {version}")).await;
            }
            Ok(())
        }
        Some("run") => {
            runner.ensure_tracking().await?;
            let applied = runner.run().await?;
            if applied.is_empty() {
                ctx.say("nothing to apply").await;
            } else {
                for version in &applied {
                    ctx.say(format!("applied {version}")).await;
                }
                ctx.status(
                    StatusLevel::Success,
                    format!("{} migration(s) applied", applied.len()),
                )
                .await;
            }
            Ok(())
        }
        Some("mark") | Some("mark-applied") => {
            let spec = args.get(1).context("usage: migrate mark <version|N-M>")?;
            let recorded = runner.mark_applied(spec).await?;
            for version in &recorded {
                ctx.say(format!("recorded {version}")).await;
            }
            ctx.status(
                StatusLevel::Success,
                format!("{} version(s) recorded", recorded.len()),
            )
            .await;
            Ok(())
        }
        Some(other) => bail!("unknown migrate subcommand '{other}' (status, pending, run, mark)"),
    }
}
