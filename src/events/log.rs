use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use specflow_common::LifecycleEvent;
use tokio::io::AsyncWriteExt;

use super::EventHandler;

pub const EVENT_LOG_HANDLER: &str = "event-log";

/// Appends every lifecycle event as one JSON line.
pub struct EventLogHandler {
    path: PathBuf,
}

impl EventLogHandler {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Read back all recorded events, skipping lines that fail to parse.
    pub fn read_all(path: &Path) -> Result<Vec<LifecycleEvent>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[async_trait]
impl EventHandler for EventLogHandler {
    fn name(&self) -> &str {
        EVENT_LOG_HANDLER
    }

    async fn handle(&self, event: &LifecycleEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(event).context("Failed to serialize event")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }
}
