//! Initialization of a specflow project.
//!
//! ```text
//! .specflow/
//! ├── specflow.toml    # Project configuration (defaults on first init)
//! ├── specflow.db      # Spec records and sync log (created on first use)
//! ├── events.jsonl     # Lifecycle event log
//! └── logs/            # Daily rolling diagnostic logs
//! specs/               # One markdown document per spec
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_FILE, SPECFLOW_DIR, SpecflowToml, log_dir};

/// Result of initializing a specflow project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the `.specflow` directory
    pub specflow_dir: PathBuf,
    /// Whether the directory was newly created
    pub created: bool,
    /// Whether a default `specflow.toml` was written
    pub config_written: bool,
}

/// Initialize a specflow project in `project_dir`.
///
/// Running it again completes a partial layout and never overwrites an
/// existing `specflow.toml`.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let specflow_dir = project_dir.join(SPECFLOW_DIR);
    let created = !specflow_dir.exists();

    std::fs::create_dir_all(log_dir(project_dir))
        .with_context(|| format!("Failed to create directory: {}", specflow_dir.display()))?;

    let config_path = specflow_dir.join(CONFIG_FILE);
    let config_written = !config_path.exists();
    let toml = if config_written {
        let toml = SpecflowToml::default();
        toml.save(&config_path)?;
        toml
    } else {
        SpecflowToml::load(&config_path)?
    };

    let specs_dir = project_dir.join(&toml.project.specs_dir);
    std::fs::create_dir_all(&specs_dir)
        .with_context(|| format!("Failed to create directory: {}", specs_dir.display()))?;

    Ok(InitResult {
        specflow_dir,
        created,
        config_written,
    })
}

/// Check if `project_dir` has a `.specflow` directory.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(SPECFLOW_DIR).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_project_creates_layout() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.created);
        assert!(result.config_written);
        assert!(result.specflow_dir.join(CONFIG_FILE).exists());
        assert!(result.specflow_dir.join("logs").is_dir());
        assert!(dir.path().join("specs").is_dir());
    }

    #[test]
    fn test_init_project_is_idempotent() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(!result.created);
        assert!(!result.config_written);
    }

    #[test]
    fn test_init_project_keeps_existing_config() {
        let dir = tempdir().unwrap();
        let specflow_dir = dir.path().join(SPECFLOW_DIR);
        std::fs::create_dir_all(&specflow_dir).unwrap();
        std::fs::write(
            specflow_dir.join(CONFIG_FILE),
            "[project]\nspecs_dir = \"docs/specs\"\n",
        )
        .unwrap();

        let result = init_project(dir.path()).unwrap();

        assert!(!result.created);
        assert!(!result.config_written);
        assert!(dir.path().join("docs/specs").is_dir());
        let content = std::fs::read_to_string(specflow_dir.join(CONFIG_FILE)).unwrap();
        assert!(content.contains("docs/specs"));
    }

    #[test]
    fn test_init_project_rejects_broken_config() {
        let dir = tempdir().unwrap();
        let specflow_dir = dir.path().join(SPECFLOW_DIR);
        std::fs::create_dir_all(&specflow_dir).unwrap();
        std::fs::write(specflow_dir.join(CONFIG_FILE), "not = [valid").unwrap();

        assert!(init_project(dir.path()).is_err());
    }

    #[test]
    fn test_is_initialized() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
        init_project(dir.path()).unwrap();
        assert!(is_initialized(dir.path()));
    }
}
