//! Shared test doubles for the tracker, version control and document seams.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use specflow_common::{Phase, Spec};

use crate::config::{SpecflowConfig, SpecflowToml};
use crate::document::{DocumentStore, FsDocumentStore};
use crate::remote::{IssueState, IssueTracker, IssueUpdate, NewIssue, RemoteIssue};
use crate::vcs::{BranchCheck, HeadState, VersionControl};

pub fn sample_spec(id: &str, name: &str) -> Spec {
    let now = Utc::now();
    Spec {
        id: id.to_string(),
        name: name.to_string(),
        description: None,
        phase: Phase::Requirements,
        branch_name: None,
        created_at: now,
        updated_at: now,
    }
}

/// Default configuration rooted at `dir`, without touching the filesystem.
pub fn test_config(dir: &Path) -> SpecflowConfig {
    SpecflowConfig::from_parts(dir.to_path_buf(), SpecflowToml::default())
}

// ── FakeTracker ───────────────────────────────────────────────────────

/// In-memory issue tracker that counts calls and can be told to fail.
#[derive(Default)]
pub struct FakeTracker {
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    fail_create: AtomicBool,
    fail_update: AtomicBool,
    created: Mutex<Vec<NewIssue>>,
    updates: Mutex<Vec<(i64, IssueUpdate)>>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn created_issues(&self) -> Vec<NewIssue> {
        self.created.lock().unwrap().clone()
    }

    pub fn last_update(&self) -> Option<(i64, IssueUpdate)> {
        self.updates.lock().unwrap().last().cloned()
    }

    fn issue(number: i64, state: IssueState, labels: Vec<String>) -> RemoteIssue {
        RemoteIssue {
            id: 1000 + number,
            number,
            node_id: format!("I_fake{}", number),
            html_url: format!("https://github.com/acme/widgets/issues/{}", number),
            state,
            labels,
        }
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn create_issue(&self, issue: &NewIssue) -> Result<RemoteIssue> {
        let number = self.create_calls.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        tokio::task::yield_now().await;
        if self.fail_create.load(Ordering::SeqCst) {
            anyhow::bail!("simulated create failure");
        }
        self.created.lock().unwrap().push(issue.clone());
        Ok(Self::issue(number, IssueState::Open, issue.labels.clone()))
    }

    async fn update_issue(&self, number: i64, update: &IssueUpdate) -> Result<RemoteIssue> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            anyhow::bail!("simulated update failure");
        }
        self.updates.lock().unwrap().push((number, update.clone()));
        Ok(Self::issue(
            number,
            update.state.unwrap_or(IssueState::Open),
            update.labels.clone().unwrap_or_default(),
        ))
    }

    async fn get_issue(&self, number: i64) -> Result<RemoteIssue> {
        Ok(Self::issue(number, IssueState::Open, Vec::new()))
    }
}

// ── FakeVcs ───────────────────────────────────────────────────────────

struct VcsState {
    inside: bool,
    head: HeadState,
    branches: Vec<String>,
    fail_checkout_to: Option<String>,
    fail_verify: bool,
}

/// In-memory repository with a movable HEAD.
pub struct FakeVcs {
    state: Mutex<VcsState>,
}

impl FakeVcs {
    pub fn on_branch(name: &str) -> Self {
        Self {
            state: Mutex::new(VcsState {
                inside: true,
                head: HeadState::Branch(name.to_string()),
                branches: vec![name.to_string()],
                fail_checkout_to: None,
                fail_verify: false,
            }),
        }
    }

    pub fn with_head(head: HeadState) -> Self {
        Self {
            state: Mutex::new(VcsState {
                inside: true,
                head,
                branches: Vec::new(),
                fail_checkout_to: None,
                fail_verify: false,
            }),
        }
    }

    pub fn outside_repository() -> Self {
        let vcs = Self::with_head(HeadState::Unborn);
        vcs.state.lock().unwrap().inside = false;
        vcs
    }

    /// Make every checkout of `branch` fail.
    pub fn failing_checkout_to(self, branch: &str) -> Self {
        self.state.lock().unwrap().fail_checkout_to = Some(branch.to_string());
        self
    }

    /// Make branch verification error out.
    pub fn failing_verify(self) -> Self {
        self.state.lock().unwrap().fail_verify = true;
        self
    }

    pub fn head(&self) -> HeadState {
        self.state.lock().unwrap().head.clone()
    }

    pub fn branches(&self) -> Vec<String> {
        self.state.lock().unwrap().branches.clone()
    }
}

impl VersionControl for FakeVcs {
    fn is_inside_repository(&self) -> bool {
        self.state.lock().unwrap().inside
    }

    fn current_branch(&self) -> Result<HeadState> {
        let state = self.state.lock().unwrap();
        if !state.inside {
            anyhow::bail!("not a repository");
        }
        Ok(state.head.clone())
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.branches.iter().any(|b| b == name) {
            anyhow::bail!("branch '{}' already exists", name);
        }
        state.branches.push(name.to_string());
        Ok(())
    }

    fn verify_branch(&self, name: &str) -> Result<BranchCheck> {
        let state = self.state.lock().unwrap();
        if state.fail_verify {
            anyhow::bail!("repo vanished");
        }
        Ok(BranchCheck {
            exists: state.branches.iter().any(|b| b == name),
            head: match &state.head {
                HeadState::Branch(b) => Some(b.clone()),
                _ => None,
            },
        })
    }

    fn checkout(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_checkout_to.as_deref() == Some(name) {
            anyhow::bail!("simulated checkout failure");
        }
        if !state.branches.iter().any(|b| b == name) {
            anyhow::bail!("branch '{}' not found", name);
        }
        state.head = HeadState::Branch(name.to_string());
        Ok(())
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.branches.retain(|b| b != name);
        Ok(())
    }
}

// ── FailingDocumentStore ──────────────────────────────────────────────

/// Filesystem document store whose writes or flushes can be switched to fail.
#[derive(Default)]
pub struct FailingDocumentStore {
    inner: FsDocumentStore,
    fail_write: AtomicBool,
    fail_flush: AtomicBool,
}

impl FailingDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_write.store(fail, Ordering::SeqCst);
    }

    pub fn fail_flushes(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for FailingDocumentStore {
    async fn read(&self, path: &Path) -> Result<Option<String>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        if self.fail_write.load(Ordering::SeqCst) {
            anyhow::bail!("simulated write failure");
        }
        self.inner.write(path, content).await
    }

    async fn durable_flush(&self, path: &Path) -> Result<()> {
        if self.fail_flush.load(Ordering::SeqCst) {
            anyhow::bail!("simulated flush failure");
        }
        self.inner.durable_flush(path).await
    }

    async fn remove(&self, path: &Path) -> Result<bool> {
        self.inner.remove(path).await
    }
}
