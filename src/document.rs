//! Spec documents: Markdown files with a YAML front matter block.
//!
//! The front matter mirrors the stored record (`id`, `name`, `phase`,
//! `branch`, timestamps). Rewrites go through a `serde_yaml::Mapping` so keys
//! added by hand survive a phase change.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_yaml::{Mapping, Value};
use specflow_common::{Phase, Spec};

use crate::util::slugify;

const SLUG_MAX_LEN: usize = 48;

/// File operations the coordinator needs for spec documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document. `Ok(None)` when the file does not exist.
    async fn read(&self, path: &Path) -> Result<Option<String>>;

    /// Replace the document's content.
    async fn write(&self, path: &Path, content: &str) -> Result<()>;

    /// Make a previous `write` durable.
    async fn durable_flush(&self, path: &Path) -> Result<()>;

    /// Remove a document. Returns `false` if it was already gone.
    async fn remove(&self, path: &Path) -> Result<bool>;
}

/// `DocumentStore` over the local filesystem.
///
/// Writes go to a sibling temp file that is renamed into place, so readers
/// never observe a half-written document.
#[derive(Debug, Clone, Default)]
pub struct FsDocumentStore;

impl FsDocumentStore {
    pub fn new() -> Self {
        Self
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    path.with_file_name(format!(".{}.tmp", file_name))
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn read(&self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let temp_path = temp_path_for(path);
        tokio::fs::write(&temp_path, content)
            .await
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .with_context(|| format!("Failed to move document into {}", path.display()))?;
        Ok(())
    }

    async fn durable_flush(&self, path: &Path) -> Result<()> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {} for fsync", path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to fsync {}", path.display()))?;

        // The rename is only durable once the directory entry is.
        #[cfg(unix)]
        if let Some(parent) = path.parent() {
            let dir = tokio::fs::File::open(parent)
                .await
                .with_context(|| format!("Failed to open {} for fsync", parent.display()))?;
            dir.sync_all()
                .await
                .with_context(|| format!("Failed to fsync {}", parent.display()))?;
        }
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

/// `<specs_dir>/<id8>-<slug>.md`
pub fn spec_document_path(specs_dir: &Path, spec: &Spec) -> PathBuf {
    let slug = slugify(&spec.name, SLUG_MAX_LEN);
    let file_name = if slug.is_empty() {
        format!("{}.md", spec.short_id())
    } else {
        format!("{}-{}.md", spec.short_id(), slug)
    };
    specs_dir.join(file_name)
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Split `content` into its front matter and body.
fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---")?;
    let rest = rest
        .strip_prefix('\n')
        .or_else(|| rest.strip_prefix("\r\n"))?;
    let (front, after) = match rest.strip_prefix("---") {
        Some(after) => ("", after),
        None => {
            let end = rest.find("\n---")?;
            (&rest[..end], &rest[end + "\n---".len()..])
        }
    };
    let body = after
        .strip_prefix('\n')
        .or_else(|| after.strip_prefix("\r\n"))
        .unwrap_or(after);
    Some((front, body))
}

/// Parse the front matter of a document into a YAML mapping.
pub fn parse_front_matter(content: &str) -> Result<Option<Mapping>> {
    let Some((front, _)) = split_front_matter(content) else {
        return Ok(None);
    };
    Ok(Some(parse_mapping(front)?))
}

fn parse_mapping(front: &str) -> Result<Mapping> {
    if front.trim().is_empty() {
        return Ok(Mapping::new());
    }
    serde_yaml::from_str(front).context("Failed to parse document front matter")
}

/// The `phase` recorded in a document's front matter, if any.
pub fn document_phase(content: &str) -> Result<Option<String>> {
    Ok(parse_front_matter(content)?.and_then(|m| {
        m.get("phase")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    }))
}

fn assemble(front: &Mapping, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(front).context("Failed to serialize front matter")?;
    Ok(format!("---\n{}---\n{}", yaml, body))
}

/// Render a fresh document for a newly created spec.
pub fn render_document(spec: &Spec) -> Result<String> {
    let mut front = Mapping::new();
    front.insert("id".into(), spec.id.clone().into());
    front.insert("name".into(), spec.name.clone().into());
    front.insert("phase".into(), spec.phase.as_str().into());
    if let Some(branch) = &spec.branch_name {
        front.insert("branch".into(), branch.clone().into());
    }
    front.insert("created_at".into(), format_ts(&spec.created_at).into());
    front.insert("updated_at".into(), format_ts(&spec.updated_at).into());

    let mut body = format!("\n# {}\n", spec.name);
    if let Some(description) = spec.description.as_deref().filter(|d| !d.trim().is_empty()) {
        body.push('\n');
        body.push_str(description.trim());
        body.push('\n');
    }
    assemble(&front, &body)
}

/// Set `phase` and `updated_at` in the front matter, leaving every other
/// key and the body untouched. A document without front matter gains one.
pub fn rewrite_front_matter(
    content: &str,
    phase: Phase,
    updated_at: &DateTime<Utc>,
) -> Result<String> {
    let (mut front, body) = match split_front_matter(content) {
        Some((front, body)) => (parse_mapping(front)?, body),
        None => (Mapping::new(), content),
    };
    front.insert("phase".into(), phase.as_str().into());
    front.insert("updated_at".into(), format_ts(updated_at).into());
    assemble(&front, body)
}

/// Document body stripped of front matter, for mirroring to the tracker.
pub fn document_body(content: &str) -> &str {
    split_front_matter(content)
        .map(|(_, body)| body)
        .unwrap_or(content)
        .trim()
}
