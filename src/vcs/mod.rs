//! Version-control seam used by the branch lifecycle manager.

pub mod branch;
pub mod git;

use anyhow::Result;

pub use branch::{BranchManager, BranchOutcome, sanitize_branch_component};
pub use git::GitVersionControl;

/// Where HEAD currently points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadState {
    Branch(String),
    Detached,
    /// Repository without any commit yet.
    Unborn,
}

/// Observed state of a branch after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCheck {
    pub exists: bool,
    /// Branch HEAD is on, `None` when detached or unborn.
    pub head: Option<String>,
}

/// The operations the branch manager needs from a repository.
pub trait VersionControl: Send + Sync {
    fn is_inside_repository(&self) -> bool;

    fn current_branch(&self) -> Result<HeadState>;

    /// Create a local branch at HEAD. Does not switch to it.
    fn create_branch(&self, name: &str) -> Result<()>;

    fn verify_branch(&self, name: &str) -> Result<BranchCheck>;

    fn checkout(&self, name: &str) -> Result<()>;

    fn delete_branch(&self, name: &str) -> Result<()>;
}
