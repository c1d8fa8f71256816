//! SQL migration runner.
//!
//! Migrations are plain `.sql` files applied in filename order, tracked in
//! `supabase_migrations.schema_migrations`. SQL executes through `psql`
//! with `ON_ERROR_STOP` so a failing file aborts its transaction and the
//! run stops there.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::exec;

const TRACKING_TABLE: &str = "supabase_migrations.schema_migrations";

/// Applied/pending split for `migrate status`.
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    pub applied: Vec<String>,
    pub pending: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MigrationRunner {
    db_url: String,
    dir: PathBuf,
}

impl MigrationRunner {
    pub fn new(db_url: String, dir: PathBuf) -> Self {
        Self { db_url, dir }
    }

    async fn psql(&self, extra: &[&str]) -> Result<exec::CmdOutput> {
        let mut args = vec![self.db_url.as_str(), "-v", "ON_ERROR_STOP=1"];
        args.extend(extra);
        exec::run("psql", &args, None, None).await
    }

    /// Creates the tracking schema and table when missing.
    pub async fn ensure_tracking(&self) -> Result<()> {
        let sql = format!(
            "CREATE SCHEMA IF NOT EXISTS supabase_migrations; \
             CREATE TABLE IF NOT EXISTS {TRACKING_TABLE} (version TEXT PRIMARY KEY);"
        );
        let out = self.psql(&["-c", &sql]).await?;
        if !out.ok() {
            bail!("failed to prepare tracking table: {}", out.stderr.trim());
        }
        Ok(())
    }

    /// Versions present on disk, sorted by filename.
    pub fn disk_versions(&self) -> Result<Vec<String>> {
        let mut versions = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("no migrations dir at {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("sql") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    versions.push(stem.to_string());
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    pub async fn applied_versions(&self) -> Result<Vec<String>> {
        self.ensure_tracking().await?;
        let sql = format!("SELECT version FROM {TRACKING_TABLE} ORDER BY version;");
        let out = self.psql(&["-t", "-A", "-c", &sql]).await?;
        if !out.ok() {
            bail!("failed to read applied versions: {}", out.stderr.trim());
        }
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    pub async fn status(&self) -> Result<MigrationStatus> {
        let disk = self.disk_versions()?;
        let applied = self.applied_versions().await?;
        let pending = pending_of(&disk, &applied);
        Ok(MigrationStatus { applied, pending })
    }

    /// Applies every pending migration, each in its own transaction. Stops
    /// at the first failure and reports what was applied before it.
    pub async fn run(&self) -> Result<Vec<String>> {
        let status = self.status().await?;
        let mut done = Vec::new();
        for version in status.pending {
            let file = self.dir.join(format!("{version}.sql"));
            let file_arg = file.to_string_lossy().into_owned();
            let record = format!("INSERT INTO {TRACKING_TABLE} (version) VALUES ('{version}');");
            let out = self
                .psql(&["--single-transaction", "-f", &file_arg, "-c", &record])
                .await?;
            if !out.ok() {
                bail!(
                    "migration {version} failed after {} applied: {}",
                    done.len(),
                    out.stderr.trim()
                );
            }
            done.push(version);
        }
        Ok(done)
    }

    /// Records versions as applied without running them. Accepts exact
    /// versions, numeric prefixes, and `N-M` ranges over leading numbers.
    pub async fn mark_applied(&self, spec: &str) -> Result<Vec<String>> {
        let disk = self.disk_versions()?;
        let versions = expand_spec(spec, &disk)?;
        self.ensure_tracking().await?;
        for version in &versions {
            let sql = format!(
                "INSERT INTO {TRACKING_TABLE} (version) VALUES ('{version}') \
                 ON CONFLICT DO NOTHING;"
            );
            let out = self.psql(&["-c", &sql]).await?;
            if !out.ok() {
                bail!("failed to record {version}: {}", out.stderr.trim());
            }
        }
        Ok(versions)
    }
}

/// Disk versions not yet recorded as applied.
pub fn pending_of(disk: &[String], applied: &[String]) -> Vec<String> {
    disk.iter()
        .filter(|v| !applied.contains(v))
        .cloned()
        .collect()
}

fn leading_number(version: &str) -> Option<u64> {
    let digits: String = version.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Expands a mark-applied spec against the versions on disk.
pub fn expand_spec(spec: &str, disk: &[String]) -> Result<Vec<String>> {
    if let Some((lo, hi)) = spec.split_once('-') {
        if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<u64>(), hi.trim().parse::<u64>()) {
            if lo > hi {
                bail!("empty range {spec}");
            }
            let matched: Vec<String> = disk
                .iter()
                .filter(|v| leading_number(v).is_some_and(|n| n >= lo && n <= hi))
                .cloned()
                .collect();
            if matched.is_empty() {
                bail!("no migrations match range {spec}");
            }
            return Ok(matched);
        }
    }

    if disk.iter().any(|v| v == spec) {
        return Ok(vec![spec.to_string()]);
    }
    if let Some(found) = disk.iter().find(|v| v.starts_with(spec)) {
        return Ok(vec![found.clone()]);
    }
    bail!("no migration matches {spec}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk() -> Vec<String> {
        vec![
            "001_init".to_string(),
            "002_users".to_string(),
            "003_sessions".to_string(),
            "010_indexes".to_string(),
        ]
    }

    #[test]
    fn pending_preserves_disk_order() {
        let applied = vec!["001_init".to_string(), "003_sessions".to_string()];
        assert_eq!(
            pending_of(&disk(), &applied),
            vec!["002_users", "010_indexes"]
        );
    }

    #[test]
    fn range_spec_matches_leading_numbers() {
        let matched = expand_spec("1-3", &disk()).unwrap();
        assert_eq!(matched, vec!["001_init", "002_users", "003_sessions"]);
    }

    #[test]
    fn prefix_spec_resolves_to_first_match() {
        assert_eq!(expand_spec("010", &disk()).unwrap(), vec!["010_indexes"]);
        assert_eq!(expand_spec("002_users", &disk()).unwrap(), vec!["002_users"]);
    }

    #[test]
    fn unmatched_specs_are_errors() {
        assert!(expand_spec("99", &disk()).is_err());
        assert!(expand_spec("5-2", &disk()).is_err());
        assert!(expand_spec("4-9", &disk()).is_err());
    }

    #[test]
    fn disk_versions_sorted_from_directory() {
        let dir = std::env::temp_dir().join(format!("devdeck-mig-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("002_b.sql"), "select 2;").unwrap();
        std::fs::write(dir.join("001_a.sql"), "select 1;").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignore me").unwrap();

        let runner = MigrationRunner::new("postgres://x".into(), dir.clone());
        assert_eq!(runner.disk_versions().unwrap(), vec!["001_a", "002_b"]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
