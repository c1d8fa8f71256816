//! The `git` command and its subcommands, shared by both apps.

use anyhow::{bail, Result};

use crate::git::GitService;
use crate::output::StatusLevel;

use super::{CmdContext, CmdFuture, CommandDef, Registry};

const DIFF_PREVIEW_LINES: usize = 50;
const DEFAULT_LOG_COUNT: usize = 10;

pub fn register(registry: &mut Registry) {
    registry.register(CommandDef {
        name: "git",
        aliases: &[],
        usage: "git <sub> [--repo name]",
        summary: "status, add, commit, push, pull, diff, log, pr",
        section: "Git",
        run: run_git,
    });
}

fn run_git(ctx: CmdContext, args: Vec<String>) -> CmdFuture {
    Box::pin(async move { git_command(ctx, args).await })
}

/// Pulls a `--repo <name>` pair out of the argument list, wherever it sits.
fn split_repo_arg(args: Vec<String>) -> Result<(Option<String>, Vec<String>)> {
    let mut repo = None;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--repo" || arg == "-r" {
            match iter.next() {
                Some(name) => repo = Some(name),
                None => bail!("{arg} needs a repo name"),
            }
        } else {
            rest.push(arg);
        }
    }
    Ok((repo, rest))
}

async fn git_command(ctx: CmdContext, args: Vec<String>) -> Result<()> {
    let (repo, args) = split_repo_arg(args)?;
    let git = ctx.profile.git(repo.as_deref())?;
    let sub = args.first().map(String::as_str).unwrap_or("status");
    let rest = if args.is_empty() { &[] } else { &args[1..] };

    match sub {
        "status" | "st" => show_status(&ctx, &git).await,
        "add" => add(&ctx, &git, rest).await,
        "commit" => commit(&ctx, &git, rest).await,
        "push" => push(&ctx, &git, rest.first().map(String::as_str) == Some("-u")).await,
        "pull" => pull(&ctx, &git).await,
        "diff" => diff(&ctx, &git, rest.first().map(String::as_str) == Some("--staged")).await,
        "log" => log(&ctx, &git, rest.first().and_then(|n| n.parse().ok())).await,
        "pr" => pr(&ctx, &git, rest).await,
        other => bail!("unknown git subcommand '{other}'"),
    }
}

async fn show_status(ctx: &CmdContext, git: &GitService) -> Result<()> {
    let status = git.status().await?;
    let mut position = String::new();
    if status.ahead > 0 {
        position.push_str(&format!(" ↑{}", status.ahead));
    }
    if status.behind > 0 {
        position.push_str(&format!(" ↓{}", status.behind));
    }
    ctx.say(format!(
        "[{}] on {}{}",
        status.repo, status.branch, position
    ))
    .await;

    if status.is_clean() {
        ctx.say("  working tree clean").await;
        return Ok(());
    }
    for (label, files) in [
        ("staged", &status.staged),
        ("modified", &status.unstaged),
        ("untracked", &status.untracked),
    ] {
        for file in files {
            ctx.say(format!("  {label:<10} {file}")).await;
        }
    }
    Ok(())
}

async fn add(ctx: &CmdContext, git: &GitService, files: &[String]) -> Result<()> {
    let out = git.add(files).await?;
    if !out.ok() {
        bail!("git add failed: {}", out.stderr.trim());
    }
    let status = git.status().await?;
    ctx.status(
        StatusLevel::Success,
        format!("staged {} file(s)", status.staged.len()),
    )
    .await;
    Ok(())
}

/// Commits with the given message, staging everything first when the
/// index is empty.
async fn commit(ctx: &CmdContext, git: &GitService, args: &[String]) -> Result<()> {
    let message = args.join(" ");
    if message.trim().is_empty() {
        bail!("usage: git commit <message>");
    }
    let status = git.status().await?;
    if status.staged.is_empty() {
        if status.is_clean() {
            bail!("nothing to commit");
        }
        ctx.say("nothing staged, staging all changes").await;
        let out = git.add(&[]).await?;
        if !out.ok() {
            bail!("git add failed: {}", out.stderr.trim());
        }
    }
    let out = git.commit(&message).await?;
    if !out.ok() {
        bail!("git commit failed: {}", out.text().trim().to_string());
    }
    ctx.say_lines(&out.stdout).await;
    ctx.status(StatusLevel::Success, "committed").await;
    Ok(())
}

async fn push(ctx: &CmdContext, git: &GitService, set_upstream: bool) -> Result<()> {
    let out = git.push(set_upstream).await?;
    if !out.ok() {
        bail!("git push failed: {}", out.stderr.trim());
    }
    // git writes push progress to stderr even on success
    ctx.say_lines(out.text().trim()).await;
    ctx.status(StatusLevel::Success, "pushed").await;
    Ok(())
}

async fn pull(ctx: &CmdContext, git: &GitService) -> Result<()> {
    let out = git.pull().await?;
    if !out.ok() {
        bail!("git pull failed: {}", out.stderr.trim());
    }
    ctx.say_lines(out.stdout.trim()).await;
    ctx.status(StatusLevel::Success, "pulled").await;
    Ok(())
}

async fn diff(ctx: &CmdContext, git: &GitService, staged: bool) -> Result<()> {
    let out = git.diff(staged).await?;
    if !out.ok() {
        bail!("git diff failed: {}", out.stderr.trim());
    }
    if out.stdout.trim().is_empty() {
        ctx.say("no changes").await;
        return Ok(());
    }
    let lines: Vec<&str> = out.stdout.lines().collect();
    for line in lines.iter().take(DIFF_PREVIEW_LINES) {
        ctx.say(line.to_string()).await;
    }
    if lines.len() > DIFF_PREVIEW_LINES {
        ctx.say(format!(
            "... {} more lines, run git diff in a shell for the rest",
            lines.len() - DIFF_PREVIEW_LINES
        ))
        .await;
    }
    Ok(())
}

async fn log(ctx: &CmdContext, git: &GitService, count: Option<usize>) -> Result<()> {
    let commits = git.log(count.unwrap_or(DEFAULT_LOG_COUNT)).await?;
    if commits.is_empty() {
        ctx.say("no commits").await;
        return Ok(());
    }
    for c in commits {
        ctx.say(format!("{}  {}  ({}, {})", c.hash, c.message, c.author, c.time))
            .await;
    }
    Ok(())
}

async fn pr(ctx: &CmdContext, git: &GitService, args: &[String]) -> Result<()> {
    match args.first().map(String::as_str) {
        None | Some("list") => {
            let prs = git.list_prs("open").await?;
            if prs.is_empty() {
                ctx.say("no open PRs").await;
                return Ok(());
            }
            for pr in prs {
                let draft = if pr.draft { " [draft]" } else { "" };
                ctx.say(format!(
                    "#{} {}{} ({} -> {}, @{})",
                    pr.number, pr.title, draft, pr.head_branch, pr.base_branch, pr.author.login
                ))
                .await;
                ctx.say(format!("    {}", pr.url)).await;
            }
            Ok(())
        }
        Some("create") => {
            let mut title_words = Vec::new();
            let mut base = "main".to_string();
            let mut draft = false;
            let mut iter = args[1..].iter();
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--draft" => draft = true,
                    "--base" => match iter.next() {
                        Some(b) => base = b.clone(),
                        None => bail!("--base needs a branch name"),
                    },
                    word => title_words.push(word.to_string()),
                }
            }
            let title = title_words.join(" ");
            if title.is_empty() {
                bail!("usage: git pr create <title> [--base branch] [--draft]");
            }
            let url = git.create_pr(&title, "", &base, draft).await?;
            ctx.say(url).await;
            ctx.status(StatusLevel::Success, "PR created").await;
            Ok(())
        }
        Some(other) => bail!("unknown pr subcommand '{other}' (list, create)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_flag_is_extracted_from_anywhere() {
        let (repo, rest) = split_repo_arg(vec![
            "commit".into(),
            "--repo".into(),
            "backend".into(),
            "fix".into(),
        ])
        .unwrap();
        assert_eq!(repo.as_deref(), Some("backend"));
        assert_eq!(rest, vec!["commit", "fix"]);
    }

    #[test]
    fn missing_repo_value_is_an_error() {
        assert!(split_repo_arg(vec!["status".into(), "-r".into()]).is_err());
    }

    #[test]
    fn no_repo_flag_passes_args_through() {
        let (repo, rest) = split_repo_arg(vec!["log".into(), "5".into()]).unwrap();
        assert!(repo.is_none());
        assert_eq!(rest, vec!["log", "5"]);
    }
}
