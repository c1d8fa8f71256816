//! `.env` preset engine.
//!
//! The `.env` file is treated as the source of truth; presets.toml holds
//! named groups of KEY=value pairs that can be swapped in and out of it.
//! Sections in the file are marked with `# ### LABEL` headers, and swapped
//! blocks get a `# --- group: preset ---` marker so the file stays
//! readable by hand.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::Regex;

/// Env-var prefix that identifies each managed group.
pub const GROUP_PREFIXES: &[(&str, &str)] = &[
    ("auth0", "HCM_AUTH0_"),
    ("prism", "HCM_PRISMHR_"),
    ("db", "DB_"),
];

/// Keys shown in the summary bar, with their group labels.
const SUMMARY_KEYS: &[(&str, &str)] = &[
    ("DB_ENDPOINT", "db"),
    ("HCM_PRISMHR_USER_NAME", "prism"),
    ("HCM_AUTH0_DOMAIN", "auth0"),
];

const SUMMARY_VALUE_WIDTH: usize = 28;

fn section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#\s*#{3,}\s+(.+)$").unwrap())
}

fn kv_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(.*)$").unwrap())
}

fn commented_kv_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#\s*([A-Za-z_][A-Za-z0-9_]*)=(.*)$").unwrap())
}

pub fn group_prefix(group: &str) -> Option<&'static str> {
    GROUP_PREFIXES
        .iter()
        .find(|(g, _)| *g == group)
        .map(|(_, p)| *p)
}

fn header_keyword_group(word: &str) -> Option<&'static str> {
    match word {
        "AUTH0" => Some("auth0"),
        "PRISM" | "PRISMHR" => Some("prism"),
        "DB" => Some("db"),
        _ => None,
    }
}

/// Per-group presets: preset name -> key/value pairs.
pub type GroupPresets = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone)]
pub struct EnvPresets {
    env_path: PathBuf,
    presets_path: PathBuf,
    backups_dir: PathBuf,
}

impl EnvPresets {
    pub fn new(env_path: PathBuf, presets_path: PathBuf, backups_dir: PathBuf) -> Self {
        Self {
            env_path,
            presets_path,
            backups_dir,
        }
    }

    fn read_env_lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.env_path)
            .map(|text| text.lines().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Presets per group, skipping reserved `_`-prefixed tables.
    pub fn load_presets(&self) -> BTreeMap<String, GroupPresets> {
        let Ok(raw) = std::fs::read_to_string(&self.presets_path) else {
            return BTreeMap::new();
        };
        let Ok(table) = raw.parse::<toml::Table>() else {
            return BTreeMap::new();
        };
        let mut out = BTreeMap::new();
        for (group, value) in table {
            if group.starts_with('_') {
                continue;
            }
            let Some(presets) = value.as_table() else { continue };
            let mut group_presets = GroupPresets::new();
            for (name, vars) in presets {
                let Some(vars) = vars.as_table() else { continue };
                let kvs = vars
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect();
                group_presets.insert(name.clone(), kvs);
            }
            out.insert(group, group_presets);
        }
        out
    }

    /// `[_full]` combined presets: name -> { group: preset }.
    pub fn load_full_presets(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let Ok(raw) = std::fs::read_to_string(&self.presets_path) else {
            return BTreeMap::new();
        };
        let Ok(table) = raw.parse::<toml::Table>() else {
            return BTreeMap::new();
        };
        let mut out = BTreeMap::new();
        if let Some(full) = table.get("_full").and_then(|v| v.as_table()) {
            for (name, mapping) in full {
                let Some(mapping) = mapping.as_table() else { continue };
                let entry = mapping
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect();
                out.insert(name.clone(), entry);
            }
        }
        out
    }

    pub fn list_presets(&self) -> BTreeMap<String, Vec<String>> {
        self.load_presets()
            .into_iter()
            .map(|(group, presets)| (group, presets.keys().cloned().collect()))
            .collect()
    }

    fn active_vars(&self, prefix: &str) -> BTreeMap<String, String> {
        let mut active = BTreeMap::new();
        for line in self.read_env_lines() {
            if let Some(caps) = kv_re().captures(line.trim()) {
                if caps[1].starts_with(prefix) {
                    active.insert(caps[1].to_string(), caps[2].to_string());
                }
            }
        }
        active
    }

    /// Finds which preset the live file matches for a group. A match
    /// requires every preset key to be present with the same value.
    /// Returns ("custom", None) when nothing matches.
    pub fn identify_active(&self, group: &str) -> (String, Option<String>) {
        let Some(prefix) = group_prefix(group) else {
            return ("custom".to_string(), None);
        };
        let active = self.active_vars(prefix);
        let presets = self.load_presets();
        if let Some(group_presets) = presets.get(group) {
            for (name, vars) in group_presets {
                if vars.iter().all(|(k, v)| active.get(k) == Some(v)) {
                    let rep_key = representative_key(group);
                    let rep_val = active
                        .get(rep_key)
                        .cloned()
                        .or_else(|| active.values().next().cloned())
                        .unwrap_or_default();
                    return (name.clone(), Some(format!("{rep_key}={rep_val}")));
                }
            }
        }
        ("custom".to_string(), None)
    }

    /// The full-preset name when every group's active preset matches.
    pub fn identify_active_full(&self) -> Option<String> {
        let full = self.load_full_presets();
        if full.is_empty() {
            return None;
        }
        let mut active_by_group = BTreeMap::new();
        for (group, _) in GROUP_PREFIXES {
            let (name, _) = self.identify_active(group);
            active_by_group.insert(group.to_string(), name);
        }
        full.into_iter()
            .find(|(_, mapping)| {
                mapping
                    .iter()
                    .all(|(group, preset)| active_by_group.get(group) == Some(preset))
            })
            .map(|(name, _)| name)
    }

    /// Representative values for the summary bar, truncated for display.
    pub fn summary_values(&self) -> Vec<(String, String)> {
        let mut active = BTreeMap::new();
        for line in self.read_env_lines() {
            if let Some(caps) = kv_re().captures(line.trim()) {
                active.insert(caps[1].to_string(), caps[2].to_string());
            }
        }
        SUMMARY_KEYS
            .iter()
            .map(|(key, label)| {
                let val = active.get(*key).cloned().unwrap_or_else(|| "–".to_string());
                (label.to_string(), truncate_value(&val))
            })
            .collect()
    }

    /// Copies `.env` aside before any rewrite. Returns the backup path.
    pub fn backup_env(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.backups_dir)
            .with_context(|| format!("failed to create {}", self.backups_dir.display()))?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let dest = self.backups_dir.join(format!(".env.{stamp}"));
        std::fs::copy(&self.env_path, &dest)
            .with_context(|| format!("failed to back up {}", self.env_path.display()))?;
        Ok(dest)
    }

    /// Replaces a group's active vars with a preset's values.
    pub fn swap_group(&self, group: &str, preset_name: &str) -> Result<String> {
        let prefix = group_prefix(group).with_context(|| format!("unknown group: {group}"))?;
        let presets = self.load_presets();
        let Some(vars) = presets.get(group).and_then(|g| g.get(preset_name)) else {
            let available = presets
                .get(group)
                .map(|g| g.keys().cloned().collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            bail!("preset '{preset_name}' not found for group '{group}'. Available: {available}");
        };
        if !self.env_path.exists() {
            bail!(".env not found at {}", self.env_path.display());
        }

        let backup = self.backup_env()?;
        let lines = self.read_env_lines();

        let removal: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| {
                kv_re()
                    .captures(line.trim())
                    .is_some_and(|c| c[1].starts_with(prefix))
            })
            .map(|(i, _)| i)
            .collect();

        let mut block = vec![format!("# --- {group}: {preset_name} ---")];
        for (key, value) in vars {
            block.push(format!("{key}={value}"));
        }

        let mut result: Vec<String> = Vec::with_capacity(lines.len() + block.len());
        let mut inserted = false;
        for (i, line) in lines.iter().enumerate() {
            if removal.contains(&i) {
                if !inserted {
                    result.extend(block.iter().cloned());
                    inserted = true;
                }
                continue;
            }
            result.push(line.clone());
        }
        if !inserted {
            let at = insert_position(&lines, prefix);
            result.splice(at..at, block.into_iter());
        }

        let mut body = result.join("\n");
        body.push('\n');
        std::fs::write(&self.env_path, body)
            .with_context(|| format!("failed to write {}", self.env_path.display()))?;

        let backup_name = backup
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(format!("swapped {group} -> {preset_name} (backup: {backup_name})"))
    }

    /// Generates presets.toml from the commented blocks already in `.env`.
    pub fn seed_presets(&self) -> Result<String> {
        if self.presets_path.exists() {
            bail!(
                "presets file already exists: {}\ndelete it first to re-seed",
                self.presets_path.display()
            );
        }
        let lines = self.read_env_lines();
        if lines.is_empty() {
            bail!(".env not found or empty at {}", self.env_path.display());
        }

        let sections = collect_sections(&lines);
        if sections.is_empty() {
            bail!("no preset sections found in .env");
        }

        let mut parts = Vec::new();
        for (group, preset, vars) in &sections {
            parts.push(format!("[{group}.{preset}]"));
            for (key, value) in vars {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                parts.push(format!("{key} = \"{escaped}\""));
            }
            parts.push(String::new());
        }

        if let Some(parent) = self.presets_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&self.presets_path, parts.join("\n") + "\n")
            .with_context(|| format!("failed to write {}", self.presets_path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.presets_path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(format!(
            "created {} with {} presets",
            self.presets_path.display(),
            sections.len()
        ))
    }
}

fn representative_key(group: &str) -> &'static str {
    match group {
        "auth0" => "HCM_AUTH0_DOMAIN",
        "prism" => "HCM_PRISMHR_ENVIRONMENT",
        "db" => "DB_ENDPOINT",
        _ => "",
    }
}

fn truncate_value(value: &str) -> String {
    let count = value.chars().count();
    if count <= SUMMARY_VALUE_WIDTH {
        return value.to_string();
    }
    let mut out: String = value.chars().take(SUMMARY_VALUE_WIDTH - 1).collect();
    out.push('…');
    out
}

/// New blocks go after the last commented var of the group, else at EOF.
fn insert_position(lines: &[String], prefix: &str) -> usize {
    let mut last = None;
    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = commented_kv_re().captures(line.trim()) {
            if caps[1].starts_with(prefix) {
                last = Some(i);
            }
        }
    }
    last.map(|i| i + 1).unwrap_or(lines.len())
}

/// Walks the file collecting `(group, preset, vars)` sections delimited by
/// `# ### LABEL` headers. A blank or foreign line ends the section.
fn collect_sections(lines: &[String]) -> Vec<(String, String, BTreeMap<String, String>)> {
    let mut sections = Vec::new();
    let mut current: Option<(String, String, BTreeMap<String, String>)> = None;

    for line in lines {
        let stripped = line.trim();

        if let Some(caps) = section_re().captures(stripped) {
            if let Some((group, preset, vars)) = current.take() {
                if !vars.is_empty() {
                    sections.push((group, preset, vars));
                }
            }
            current = parse_section_label(caps[1].trim())
                .map(|(group, preset)| (group.to_string(), preset, BTreeMap::new()));
            continue;
        }

        let Some((group, _, vars)) = current.as_mut() else {
            continue;
        };
        let prefix = group_prefix(group).unwrap_or("\u{0}");
        let matched = commented_kv_re()
            .captures(stripped)
            .or_else(|| kv_re().captures(stripped));
        match matched {
            Some(caps) => {
                if caps[1].starts_with(prefix) {
                    vars.insert(caps[1].to_string(), caps[2].to_string());
                }
            }
            None => {
                // end of the section
                if let Some((group, preset, vars)) = current.take() {
                    if !vars.is_empty() {
                        sections.push((group, preset, vars));
                    }
                }
            }
        }
    }

    if let Some((group, preset, vars)) = current {
        if !vars.is_empty() {
            sections.push((group, preset, vars));
        }
    }
    sections
}

/// Parses a header label like "AUTH0 PROD" or "PROD DB" into
/// `(group, preset)`. The first keyword word names the group; the rest,
/// lowercased and joined, name the preset.
pub fn parse_section_label(label: &str) -> Option<(&'static str, String)> {
    let words: Vec<String> = label.to_uppercase().split_whitespace().map(String::from).collect();
    let mut group = None;
    let mut remaining = Vec::new();
    for word in words {
        match (group, header_keyword_group(&word)) {
            (None, Some(found)) => group = Some(found),
            _ => remaining.push(word),
        }
    }
    match (group, remaining.is_empty()) {
        (Some(group), false) => Some((group, remaining.join("_").to_lowercase())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENV_SAMPLE: &str = "\
# ### AUTH0 PROD
HCM_AUTH0_DOMAIN=armhr.us.auth0.com
HCM_AUTH0_CLIENT_ID=prod123

# ### AUTH0 LOCAL
# HCM_AUTH0_DOMAIN=localhost:3001
# HCM_AUTH0_CLIENT_ID=local123

# ### PROD DB
DB_ENDPOINT=prod.cluster.rds.amazonaws.com
";

    const PRESETS_SAMPLE: &str = r#"
[auth0.prod]
HCM_AUTH0_DOMAIN = "armhr.us.auth0.com"
HCM_AUTH0_CLIENT_ID = "prod123"

[auth0.local]
HCM_AUTH0_DOMAIN = "localhost:3001"
HCM_AUTH0_CLIENT_ID = "local123"

[db.prod]
DB_ENDPOINT = "prod.cluster.rds.amazonaws.com"

[_full.prod]
auth0 = "prod"
db = "prod"
"#;

    fn fixture(tag: &str) -> EnvPresets {
        let dir = std::env::temp_dir().join(format!("devdeck-env-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(".env"), ENV_SAMPLE).unwrap();
        std::fs::write(dir.join("presets.toml"), PRESETS_SAMPLE).unwrap();
        EnvPresets::new(
            dir.join(".env"),
            dir.join("presets.toml"),
            dir.join("backups"),
        )
    }

    #[test]
    fn section_labels_resolve_group_and_preset() {
        assert_eq!(parse_section_label("AUTH0 PROD"), Some(("auth0", "prod".to_string())));
        assert_eq!(parse_section_label("PROD DB"), Some(("db", "prod".to_string())));
        assert_eq!(
            parse_section_label("PRISMHR STAGE TWO"),
            Some(("prism", "stage_two".to_string()))
        );
        assert_eq!(parse_section_label("RANDOM NOTES"), None);
        assert_eq!(parse_section_label("DB"), None);
    }

    #[test]
    fn identify_active_matches_all_keys() {
        let env = fixture("identify");
        let (name, rep) = env.identify_active("auth0");
        assert_eq!(name, "prod");
        assert_eq!(rep.as_deref(), Some("HCM_AUTH0_DOMAIN=armhr.us.auth0.com"));
    }

    #[test]
    fn full_preset_requires_every_group() {
        let env = fixture("full");
        assert_eq!(env.identify_active_full().as_deref(), Some("prod"));
        env.swap_group("auth0", "local").unwrap();
        assert_eq!(env.identify_active_full(), None);
    }

    #[test]
    fn swap_replaces_active_block_in_place() {
        let env = fixture("swap");
        let message = env.swap_group("auth0", "local").unwrap();
        assert!(message.starts_with("swapped auth0 -> local"));

        let text = std::fs::read_to_string(&env.env_path).unwrap();
        assert!(text.contains("# --- auth0: local ---"));
        assert!(text.contains("HCM_AUTH0_DOMAIN=localhost:3001"));
        assert!(!text.contains("HCM_AUTH0_CLIENT_ID=prod123"));
        // untouched groups survive
        assert!(text.contains("DB_ENDPOINT=prod.cluster.rds.amazonaws.com"));
        // a backup landed next door
        assert_eq!(std::fs::read_dir(&env.backups_dir).unwrap().count(), 1);

        let (name, _) = env.identify_active("auth0");
        assert_eq!(name, "local");
    }

    #[test]
    fn swap_unknown_preset_is_refused() {
        let env = fixture("unknown");
        let err = env.swap_group("auth0", "nope").unwrap_err();
        assert!(err.to_string().contains("Available: local, prod"));
    }

    #[test]
    fn seed_builds_presets_from_commented_blocks() {
        let env = fixture("seed");
        std::fs::remove_file(&env.presets_path).unwrap();
        let message = env.seed_presets().unwrap();
        assert!(message.contains("3 presets"));

        let presets = env.load_presets();
        assert_eq!(
            presets["auth0"]["local"]["HCM_AUTH0_DOMAIN"],
            "localhost:3001"
        );
        assert_eq!(
            presets["db"]["prod"]["DB_ENDPOINT"],
            "prod.cluster.rds.amazonaws.com"
        );
        // re-seeding over an existing file is refused
        assert!(env.seed_presets().is_err());
    }

    #[test]
    fn summary_truncates_long_values() {
        let env = fixture("summary");
        let values = env.summary_values();
        let db = values.iter().find(|(label, _)| label == "db").unwrap();
        assert_eq!(db.1.chars().count(), SUMMARY_VALUE_WIDTH);
        assert!(db.1.ends_with('…'));
        let prism = values.iter().find(|(label, _)| label == "prism").unwrap();
        assert_eq!(prism.1, "–");
    }
}
