use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::{BranchType, ErrorCode, Repository, build::CheckoutBuilder};

use super::{BranchCheck, HeadState, VersionControl};

/// `VersionControl` backed by libgit2.
///
/// Holds only the working directory and discovers the repository per call,
/// since `git2::Repository` is not `Sync`.
pub struct GitVersionControl {
    workdir: PathBuf,
}

impl GitVersionControl {
    pub fn new(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
        }
    }

    fn repo(&self) -> Result<Repository> {
        Repository::discover(&self.workdir).with_context(|| {
            format!(
                "Failed to open git repository at {}",
                self.workdir.display()
            )
        })
    }

    /// URL of the named remote, if configured.
    pub fn remote_url(&self, remote: &str) -> Result<Option<String>> {
        let repo = self.repo()?;
        match repo.find_remote(remote) {
            Ok(r) => Ok(r.url().map(str::to_string)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to look up remote"),
        }
    }
}

impl VersionControl for GitVersionControl {
    fn is_inside_repository(&self) -> bool {
        Repository::discover(&self.workdir).is_ok()
    }

    fn current_branch(&self) -> Result<HeadState> {
        let repo = self.repo()?;
        if repo.head_detached().context("Failed to inspect HEAD")? {
            return Ok(HeadState::Detached);
        }
        match repo.head() {
            Ok(head) => Ok(head
                .shorthand()
                .map(|name| HeadState::Branch(name.to_string()))
                .unwrap_or(HeadState::Detached)),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(HeadState::Unborn)
            }
            Err(e) => Err(e).context("Failed to read HEAD"),
        }
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        let repo = self.repo()?;
        let commit = repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .context("Failed to resolve HEAD commit")?;
        repo.branch(name, &commit, false)
            .with_context(|| format!("Failed to create branch '{}'", name))?;
        Ok(())
    }

    fn verify_branch(&self, name: &str) -> Result<BranchCheck> {
        let repo = self.repo()?;
        let exists = repo.find_branch(name, BranchType::Local).is_ok();
        let head = match self.current_branch()? {
            HeadState::Branch(branch) => Some(branch),
            HeadState::Detached | HeadState::Unborn => None,
        };
        Ok(BranchCheck { exists, head })
    }

    fn checkout(&self, name: &str) -> Result<()> {
        let repo = self.repo()?;
        let refname = format!("refs/heads/{}", name);
        let target = repo
            .revparse_single(&refname)
            .with_context(|| format!("Branch '{}' not found", name))?;
        repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))
            .with_context(|| format!("Failed to check out '{}'", name))?;
        repo.set_head(&refname)
            .with_context(|| format!("Failed to move HEAD to '{}'", name))?;
        Ok(())
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        let repo = self.repo()?;
        let mut branch = repo
            .find_branch(name, BranchType::Local)
            .with_context(|| format!("Branch '{}' not found", name))?;
        branch
            .delete()
            .with_context(|| format!("Failed to delete branch '{}'", name))?;
        Ok(())
    }
}
