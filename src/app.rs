//! Wiring of store, documents, event bus, branch manager and remote sync.

use std::sync::Arc;

use anyhow::{Context, Result};
use specflow_common::EventType;
use tracing::{debug, info, warn};

use crate::config::SpecflowConfig;
use crate::coordinator::SpecCoordinator;
use crate::document::FsDocumentStore;
use crate::events::log::EVENT_LOG_HANDLER;
use crate::events::{EventBus, EventLogHandler};
use crate::remote::github::parse_owner_repo_from_url;
use crate::remote::{GitHubClient, IssueTracker};
use crate::store::{DbHandle, SpecDb};
use crate::sync::{SYNC_HANDLER, SyncHandler, SyncService};
use crate::vcs::{BranchManager, GitVersionControl, VersionControl};

pub struct App {
    pub config: SpecflowConfig,
    pub db: DbHandle,
    pub bus: Arc<EventBus>,
    pub coordinator: SpecCoordinator,
}

impl App {
    /// Open the project with the git and GitHub adapters.
    pub fn open(config: SpecflowConfig) -> Result<Self> {
        let git = Arc::new(GitVersionControl::new(&config.project_dir));
        let tracker = github_tracker(&config, &git)?;
        Self::with_adapters(config, git, tracker)
    }

    /// Open the project with explicit adapters. `tracker` is ignored when
    /// sync is disabled.
    pub fn with_adapters(
        config: SpecflowConfig,
        vcs: Arc<dyn VersionControl>,
        tracker: Option<Arc<dyn IssueTracker>>,
    ) -> Result<Self> {
        let db = DbHandle::new(
            SpecDb::new(&config.database_path()).context("Failed to open spec database")?,
        );
        let documents = Arc::new(FsDocumentStore::new());
        let tracker = tracker.filter(|_| config.sync_enabled());

        let mut required = vec![EVENT_LOG_HANDLER];
        if tracker.is_some() {
            required.push(SYNC_HANDLER);
        }
        let bus = Arc::new(EventBus::new(required));

        let event_log = Arc::new(EventLogHandler::new(&config.event_log_path()));
        for event_type in EventType::all() {
            bus.register(*event_type, event_log.clone())?;
        }

        let mut coordinator = SpecCoordinator::new(
            db.clone(),
            documents.clone(),
            bus.clone(),
            config.specs_dir(),
        )
        .with_ready_timeout(config.ready_timeout());

        if config.branches_enabled() {
            coordinator = coordinator.with_branch_manager(BranchManager::new(
                vcs,
                config.protected_branches().to_vec(),
            ));
        }

        if let Some(tracker) = tracker {
            let service = Arc::new(SyncService::new(db.clone(), tracker, documents, &config));
            let handler = Arc::new(SyncHandler::new(service.clone(), config.sync_on_create()));
            bus.register(EventType::SpecCreated, handler.clone())?;
            bus.register(EventType::PhaseChanged, handler)?;
            coordinator = coordinator.with_sync(service);
            info!("Remote sync enabled");
        }

        Ok(Self {
            config,
            db,
            bus,
            coordinator,
        })
    }
}

/// Build the GitHub client when sync is enabled and both a token and a
/// repository are available. The repository falls back to `origin`.
fn github_tracker(
    config: &SpecflowConfig,
    git: &GitVersionControl,
) -> Result<Option<Arc<dyn IssueTracker>>> {
    if !config.sync_enabled() {
        debug!("Remote sync disabled");
        return Ok(None);
    }
    let Some(token) = config.github_token() else {
        debug!(token_env = %config.toml.github.token_env, "No GitHub token, remote sync disabled");
        return Ok(None);
    };
    let repo = match config.github_repo() {
        Some(repo) => Some(repo),
        None => match git.remote_url("origin") {
            Ok(url) => url.as_deref().and_then(parse_owner_repo_from_url),
            Err(e) => {
                debug!(error = %format!("{:#}", e), "Could not read origin remote");
                None
            }
        },
    };
    let Some(repo) = repo else {
        warn!("GitHub token set but no repository configured or inferable; remote sync disabled");
        return Ok(None);
    };
    let client = GitHubClient::new(config.github_api_url(), &repo, &token)?;
    Ok(Some(Arc::new(client)))
}
