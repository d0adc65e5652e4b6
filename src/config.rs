//! Configuration for specflow.
//!
//! Settings are read from `.specflow/specflow.toml` and layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! specs_dir = "specs"
//! database = ".specflow/specflow.db"
//!
//! [branches]
//! enabled = true
//! protected = ["main", "develop"]
//!
//! [github]
//! repo = "owner/repo"
//! token_env = "GITHUB_TOKEN"
//! api_url = "https://api.github.com"
//!
//! [sync]
//! enabled = true
//! on_create = false
//!
//! [sync.labels]
//! implementation = "status: in progress"
//!
//! [events]
//! ready_timeout_ms = 5000
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use specflow_common::Phase;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::remote::github::{is_valid_github_token, is_valid_owner_repo};

pub const SPECFLOW_DIR: &str = ".specflow";
pub const CONFIG_FILE: &str = "specflow.toml";

/// Directory for rolling diagnostic logs.
pub fn log_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(SPECFLOW_DIR).join("logs")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Directory (relative to the project) holding spec documents.
    #[serde(default = "default_specs_dir")]
    pub specs_dir: PathBuf,
    /// SQLite database path (relative to the project).
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_specs_dir() -> PathBuf {
    PathBuf::from("specs")
}

fn default_database() -> PathBuf {
    PathBuf::from(SPECFLOW_DIR).join("specflow.db")
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            specs_dir: default_specs_dir(),
            database: default_database(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchesSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Branches that force the `feature/spec-` prefix when a spec is created from them.
    #[serde(default = "default_protected")]
    pub protected: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_protected() -> Vec<String> {
    vec!["main".to_string(), "develop".to_string()]
}

impl Default for BranchesSection {
    fn default() -> Self {
        Self {
            enabled: true,
            protected: default_protected(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    /// `owner/repo`. Inferred from the `origin` remote when absent.
    #[serde(default)]
    pub repo: Option<String>,
    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            repo: None,
            token_env: default_token_env(),
            api_url: default_api_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Create the remote issue as soon as a spec is created instead of on
    /// its first phase transition.
    #[serde(default)]
    pub on_create: bool,
    /// Per-phase label overrides, keyed by canonical phase name.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            enabled: true,
            on_create: false,
            labels: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsSection {
    /// How long a publisher waits for the core handlers to register.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

fn default_ready_timeout_ms() -> u64 {
    5000
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

/// Contents of `specflow.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecflowToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub branches: BranchesSection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub events: EventsSection,
}

impl SpecflowToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse specflow.toml")
    }

    /// Load `<specflow_dir>/specflow.toml`, or defaults if it does not exist.
    pub fn load_or_default(specflow_dir: &Path) -> Result<Self> {
        let config_path = specflow_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize specflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate settings and return human-readable warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(repo) = &self.github.repo
            && !is_valid_owner_repo(repo)
        {
            warnings.push(format!(
                "Invalid github.repo '{}': expected 'owner/repo'",
                repo
            ));
        }

        if self.branches.enabled && self.branches.protected.is_empty() {
            warnings.push(
                "branches.protected is empty: specs created from main will get plain spec/ branches"
                    .to_string(),
            );
        }

        for key in self.sync.labels.keys() {
            if key.parse::<Phase>().is_err() {
                warnings.push(format!("Unknown phase '{}' in [sync.labels]", key));
            }
        }

        if self.events.ready_timeout_ms == 0 {
            warnings.push(
                "events.ready_timeout_ms is 0: events may be published before core handlers register"
                    .to_string(),
            );
        }

        warnings
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct SpecflowConfig {
    pub project_dir: PathBuf,
    pub specflow_dir: PathBuf,
    pub toml: SpecflowToml,
    cli_sync: Option<bool>,
}

impl SpecflowConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let specflow_dir = project_dir.join(SPECFLOW_DIR);
        let toml = SpecflowToml::load_or_default(&specflow_dir)?;
        Ok(Self::from_parts(project_dir, toml))
    }

    /// Build from an already-loaded file, without touching the filesystem.
    pub fn from_parts(project_dir: PathBuf, toml: SpecflowToml) -> Self {
        let specflow_dir = project_dir.join(SPECFLOW_DIR);
        Self {
            project_dir,
            specflow_dir,
            toml,
            cli_sync: None,
        }
    }

    pub fn with_cli_args(project_dir: PathBuf, sync: Option<bool>) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.cli_sync = sync;
        Ok(config)
    }

    pub fn specs_dir(&self) -> PathBuf {
        self.project_dir.join(&self.toml.project.specs_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.project_dir.join(&self.toml.project.database)
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.specflow_dir.join("events.jsonl")
    }

    pub fn config_path(&self) -> PathBuf {
        self.specflow_dir.join(CONFIG_FILE)
    }

    pub fn protected_branches(&self) -> &[String] {
        &self.toml.branches.protected
    }

    pub fn branches_enabled(&self) -> bool {
        self.toml.branches.enabled
    }

    /// GitHub `owner/repo` (file → `SPECFLOW_GITHUB_REPO`).
    pub fn github_repo(&self) -> Option<String> {
        self.toml
            .github
            .repo
            .clone()
            .or_else(|| std::env::var("SPECFLOW_GITHUB_REPO").ok())
            .filter(|r| !r.trim().is_empty())
    }

    /// API token read from the configured environment variable.
    pub fn github_token(&self) -> Option<String> {
        std::env::var(&self.toml.github.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }

    pub fn github_api_url(&self) -> &str {
        &self.toml.github.api_url
    }

    /// Whether remote sync is enabled (CLI → `SPECFLOW_SYNC` → file).
    pub fn sync_enabled(&self) -> bool {
        if let Some(cli) = self.cli_sync {
            return cli;
        }
        if let Ok(env_val) = std::env::var("SPECFLOW_SYNC") {
            return env_val != "false" && env_val != "0";
        }
        self.toml.sync.enabled
    }

    pub fn sync_on_create(&self) -> bool {
        self.toml.sync.on_create
    }

    /// Remote label applied to an issue while its spec is in `phase`.
    pub fn phase_label(&self, phase: Phase) -> String {
        self.toml
            .sync
            .labels
            .get(phase.as_str())
            .cloned()
            .unwrap_or_else(|| format!("phase:{}", phase.as_str()))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.toml.events.ready_timeout_ms)
    }

    /// File warnings plus warnings about the resolved environment.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if let Some(token) = self.github_token()
            && !is_valid_github_token(&token)
        {
            warnings.push(format!(
                "{} does not look like a GitHub token (unknown prefix)",
                self.toml.github.token_env
            ));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempdir().unwrap();
        let toml = SpecflowToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.project.specs_dir, PathBuf::from("specs"));
        assert_eq!(toml.branches.protected, vec!["main", "develop"]);
        assert!(toml.sync.enabled);
        assert!(!toml.sync.on_create);
        assert_eq!(toml.events.ready_timeout_ms, 5000);
    }

    #[test]
    fn test_parse_full_file() {
        let toml = SpecflowToml::parse(
            r#"
[project]
specs_dir = "docs/specs"

[branches]
protected = ["trunk"]

[github]
repo = "acme/widgets"
token_env = "ACME_TOKEN"

[sync]
on_create = true

[sync.labels]
implementation = "status: in progress"
"#,
        )
        .unwrap();
        assert_eq!(toml.project.specs_dir, PathBuf::from("docs/specs"));
        assert_eq!(toml.branches.protected, vec!["trunk"]);
        assert_eq!(toml.github.repo.as_deref(), Some("acme/widgets"));
        assert_eq!(toml.github.token_env, "ACME_TOKEN");
        assert_eq!(toml.github.api_url, "https://api.github.com");
        assert!(toml.sync.on_create);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        assert!(SpecflowToml::parse("[project\nspecs_dir = 1").is_err());
    }

    #[test]
    fn test_validate_flags_bad_repo_and_unknown_label_phase() {
        let mut toml = SpecflowToml::default();
        toml.github.repo = Some("not-a-slug".into());
        toml.sync.labels.insert("shipping".into(), "x".into());
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("not-a-slug"));
        assert!(warnings[1].contains("shipping"));
    }

    #[test]
    fn test_phase_label_default_and_override() {
        let mut toml = SpecflowToml::default();
        toml.sync
            .labels
            .insert("review".into(), "needs review".into());
        let config = SpecflowConfig::from_parts(PathBuf::from("/tmp/p"), toml);
        assert_eq!(config.phase_label(Phase::Design), "phase:design");
        assert_eq!(config.phase_label(Phase::Review), "needs review");
    }

    #[test]
    fn test_paths_resolve_under_project_dir() {
        let config = SpecflowConfig::from_parts(PathBuf::from("/work/app"), SpecflowToml::default());
        assert_eq!(config.specs_dir(), PathBuf::from("/work/app/specs"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/work/app/.specflow/specflow.db")
        );
        assert_eq!(
            config.event_log_path(),
            PathBuf::from("/work/app/.specflow/events.jsonl")
        );
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = SpecflowToml::default();
        toml.github.repo = Some("o/r".into());
        toml.save(&path).unwrap();
        let loaded = SpecflowToml::load(&path).unwrap();
        assert_eq!(loaded.github.repo.as_deref(), Some("o/r"));
    }
}
