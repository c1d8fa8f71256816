//! Git and GitHub CLI wrappers.
//!
//! Everything shells out to `git`/`gh` and parses their stable output
//! formats: porcelain status, a pipe-delimited log format, and `gh`'s JSON.
//! Multi-repo aware so armhr can point it at either checkout.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::exec;

/// Snapshot of a repository's working tree and remote position.
#[derive(Debug, Clone, Default)]
pub struct GitStatus {
    pub repo: String,
    pub branch: String,
    pub staged: Vec<String>,
    pub unstaged: Vec<String>,
    pub untracked: Vec<String>,
    pub ahead: u32,
    pub behind: u32,
}

impl GitStatus {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.unstaged.is_empty() && self.untracked.is_empty()
    }
}

/// One line of `git log --format=%H|%s|%an|%ar`.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub time: String,
}

/// A pull request as reported by `gh pr list --json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub url: String,
    #[serde(rename = "headRefName")]
    pub head_branch: String,
    #[serde(rename = "baseRefName")]
    pub base_branch: String,
    pub author: PrAuthor,
    pub created_at: String,
    pub updated_at: String,
    #[serde(rename = "isDraft")]
    pub draft: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrAuthor {
    pub login: String,
}

const PR_JSON_FIELDS: &str =
    "number,title,state,url,headRefName,baseRefName,author,createdAt,updatedAt,isDraft";

#[derive(Debug, Clone)]
pub struct GitService {
    cwd: PathBuf,
    repo_label: String,
}

impl GitService {
    pub fn new(cwd: PathBuf, repo_label: impl Into<String>) -> Self {
        Self {
            cwd,
            repo_label: repo_label.into(),
        }
    }

    pub fn repo_label(&self) -> &str {
        &self.repo_label
    }

    async fn git(&self, args: &[&str]) -> Result<exec::CmdOutput> {
        exec::run("git", args, Some(&self.cwd), None).await
    }

    pub async fn current_branch(&self) -> Result<String> {
        let out = self.git(&["branch", "--show-current"]).await?;
        if !out.ok() {
            bail!("not a git repository: {}", self.cwd.display());
        }
        Ok(out.stdout.trim().to_string())
    }

    pub async fn status(&self) -> Result<GitStatus> {
        let branch = self.current_branch().await?;
        let porcelain = self.git(&["status", "--porcelain"]).await?;
        let (staged, unstaged, untracked) = parse_porcelain(&porcelain.stdout);

        // Fails when the branch has no upstream; treat as in-sync.
        let range = format!("HEAD...origin/{branch}");
        let counts = self
            .git(&["rev-list", "--left-right", "--count", &range])
            .await?;
        let (ahead, behind) = parse_ahead_behind(&counts.stdout);

        Ok(GitStatus {
            repo: self.repo_label.clone(),
            branch,
            staged,
            unstaged,
            untracked,
            ahead,
            behind,
        })
    }

    /// Stages the given paths, or everything when none are given.
    pub async fn add(&self, files: &[String]) -> Result<exec::CmdOutput> {
        let mut args = vec!["add"];
        if files.is_empty() {
            args.push("-A");
        } else {
            args.extend(files.iter().map(String::as_str));
        }
        self.git(&args).await
    }

    pub async fn commit(&self, message: &str) -> Result<exec::CmdOutput> {
        self.git(&["commit", "-m", message]).await
    }

    pub async fn push(&self, set_upstream: bool) -> Result<exec::CmdOutput> {
        if set_upstream {
            self.git(&["push", "-u", "origin", "HEAD"]).await
        } else {
            self.git(&["push"]).await
        }
    }

    pub async fn pull(&self) -> Result<exec::CmdOutput> {
        self.git(&["pull"]).await
    }

    pub async fn diff(&self, staged: bool) -> Result<exec::CmdOutput> {
        if staged {
            self.git(&["diff", "--staged"]).await
        } else {
            self.git(&["diff"]).await
        }
    }

    pub async fn log(&self, count: usize) -> Result<Vec<CommitInfo>> {
        let count_arg = format!("-{count}");
        let out = self
            .git(&["log", &count_arg, "--format=%H|%s|%an|%ar"])
            .await?;
        Ok(parse_log(&out.stdout))
    }

    pub async fn list_prs(&self, state: &str) -> Result<Vec<PullRequest>> {
        let out = exec::run(
            "gh",
            &["pr", "list", "--state", state, "--json", PR_JSON_FIELDS],
            Some(&self.cwd),
            None,
        )
        .await?;
        if !out.ok() {
            bail!("gh pr list failed: {}", out.stderr.trim());
        }
        serde_json::from_str(&out.stdout).context("unexpected gh pr list output")
    }

    /// Creates a PR for the current branch. Refused from main/master.
    pub async fn create_pr(
        &self,
        title: &str,
        body: &str,
        base: &str,
        draft: bool,
    ) -> Result<String> {
        let branch = self.current_branch().await?;
        if branch == "main" || branch == "master" {
            bail!("refusing to open a PR from {branch}; create a feature branch first");
        }
        let mut args = vec![
            "pr", "create", "--title", title, "--body", body, "--base", base,
        ];
        if draft {
            args.push("--draft");
        }
        let out = exec::run("gh", &args, Some(&self.cwd), None).await?;
        if !out.ok() {
            bail!("gh pr create failed: {}", out.stderr.trim());
        }
        Ok(out.stdout.trim().to_string())
    }
}

/// Splits porcelain status lines into staged / unstaged / untracked paths.
pub fn parse_porcelain(text: &str) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut staged = Vec::new();
    let mut unstaged = Vec::new();
    let mut untracked = Vec::new();
    for line in text.lines() {
        let mut chars = line.chars();
        let (Some(index), Some(worktree)) = (chars.next(), chars.next()) else {
            continue;
        };
        if line.len() < 4 {
            continue;
        }
        let path = line[3..].to_string();
        if index == '?' {
            untracked.push(path.clone());
        } else if index != ' ' {
            staged.push(path.clone());
        }
        if worktree != ' ' && worktree != '?' {
            unstaged.push(path);
        }
    }
    (staged, unstaged, untracked)
}

fn parse_ahead_behind(text: &str) -> (u32, u32) {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() == 2 {
        if let (Ok(ahead), Ok(behind)) = (parts[0].parse(), parts[1].parse()) {
            return (ahead, behind);
        }
    }
    (0, 0)
}

fn parse_log(text: &str) -> Vec<CommitInfo> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.splitn(4, '|').collect();
            if parts.len() < 4 {
                return None;
            }
            Some(CommitInfo {
                hash: parts[0].chars().take(7).collect(),
                message: parts[1].to_string(),
                author: parts[2].to_string(),
                time: parts[3].to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_splits_three_ways() {
        let text = "M  src/app.rs\n M src/tui.rs\nMM src/git.rs\n?? notes.txt\nA  new.rs\n";
        let (staged, unstaged, untracked) = parse_porcelain(text);
        assert_eq!(staged, vec!["src/app.rs", "src/git.rs", "new.rs"]);
        assert_eq!(unstaged, vec!["src/tui.rs", "src/git.rs"]);
        assert_eq!(untracked, vec!["notes.txt"]);
    }

    #[test]
    fn ahead_behind_defaults_to_zero_without_upstream() {
        assert_eq!(parse_ahead_behind("3\t1\n"), (3, 1));
        assert_eq!(parse_ahead_behind(""), (0, 0));
        assert_eq!(parse_ahead_behind("fatal: bad revision"), (0, 0));
    }

    #[test]
    fn log_parses_short_hashes_and_skips_garbage() {
        let text = "abcdef1234567|fix parser|Jo Dev|2 days ago\nnot a log line\n";
        let commits = parse_log(text);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].hash, "abcdef1");
        assert_eq!(commits[0].message, "fix parser");
        assert_eq!(commits[0].author, "Jo Dev");
        assert_eq!(commits[0].time, "2 days ago");
    }

    #[test]
    fn pr_json_round_trips_gh_fields() {
        let raw = r#"[{
            "number": 42,
            "title": "Add retry",
            "state": "OPEN",
            "url": "https://github.com/x/y/pull/42",
            "headRefName": "feat/retry",
            "baseRefName": "main",
            "author": {"login": "jo"},
            "createdAt": "2026-08-01T12:00:00Z",
            "updatedAt": "2026-08-02T12:00:00Z",
            "isDraft": true
        }]"#;
        let prs: Vec<PullRequest> = serde_json::from_str(raw).unwrap();
        assert_eq!(prs[0].number, 42);
        assert_eq!(prs[0].author.login, "jo");
        assert_eq!(prs[0].head_branch, "feat/retry");
        assert!(prs[0].draft);
    }

    #[test]
    fn clean_status_detected() {
        let status = GitStatus {
            branch: "main".into(),
            ..Default::default()
        };
        assert!(status.is_clean());
    }
}
