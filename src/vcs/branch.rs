//! Deterministic spec branch naming with verify-then-rollback creation.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use specflow_common::short_id;
use tracing::{info, warn};

use super::{HeadState, VersionControl};
use crate::errors::{Result, SpecError};

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

/// Lower-case `raw`, collapse runs outside `[a-z0-9]` to `-`, and trim
/// hyphens from both ends. May return an empty string.
pub fn sanitize_branch_component(raw: &str) -> String {
    NON_ALNUM
        .replace_all(&raw.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchOutcome {
    /// New branch created from `from` and checked out.
    Created { name: String, from: String },
    /// No branch was created; the spec proceeds without one.
    Skipped { reason: String },
}

impl BranchOutcome {
    pub fn branch_name(&self) -> Option<&str> {
        match self {
            BranchOutcome::Created { name, .. } => Some(name),
            BranchOutcome::Skipped { .. } => None,
        }
    }
}

pub struct BranchManager {
    vcs: Arc<dyn VersionControl>,
    protected: Vec<String>,
}

impl BranchManager {
    pub fn new(vcs: Arc<dyn VersionControl>, protected: Vec<String>) -> Self {
        Self { vcs, protected }
    }

    pub fn is_protected(&self, branch: &str) -> bool {
        self.protected.iter().any(|p| p == branch)
    }

    /// Compute the branch name for a spec given the branch currently checked out.
    pub fn branch_name_for(
        &self,
        spec_id: &str,
        custom_name: Option<&str>,
        current: &str,
    ) -> Result<String> {
        let id8 = short_id(spec_id);
        let suffix = match custom_name {
            Some(raw) => {
                let sanitized = sanitize_branch_component(raw);
                if sanitized.is_empty() {
                    return Err(SpecError::Validation(format!(
                        "branch name '{}' has no usable characters",
                        raw
                    )));
                }
                format!("-{}", sanitized)
            }
            None => String::new(),
        };
        if self.is_protected(current) {
            Ok(format!("feature/spec-{}{}", id8, suffix))
        } else {
            Ok(format!("spec/{}{}", id8, suffix))
        }
    }

    /// Create and check out the branch for a spec, verifying the result.
    ///
    /// Skips when there is no repository or HEAD is not on a branch. If the
    /// new branch cannot be verified, the original branch is restored and the
    /// new one deleted before `BranchVerificationFailed` is returned.
    pub fn create_spec_branch(
        &self,
        spec_id: &str,
        custom_name: Option<&str>,
    ) -> Result<BranchOutcome> {
        if !self.vcs.is_inside_repository() {
            return Ok(BranchOutcome::Skipped {
                reason: "not inside a git repository".to_string(),
            });
        }
        let original = match self.vcs.current_branch()? {
            HeadState::Branch(name) => name,
            HeadState::Detached => {
                return Ok(BranchOutcome::Skipped {
                    reason: "HEAD is detached".to_string(),
                });
            }
            HeadState::Unborn => {
                return Ok(BranchOutcome::Skipped {
                    reason: "repository has no commits yet".to_string(),
                });
            }
        };

        let name = self.branch_name_for(spec_id, custom_name, &original)?;
        if self.is_protected(&original) {
            info!(spec_id = %spec_id, from = %original, branch = %name, "On protected branch, using feature branch name");
        }

        self.vcs.create_branch(&name)?;
        let checked_out = self.vcs.checkout(&name);
        // An unreadable repository counts as a failed check; the branch may exist.
        let (exists, observed) = match self.vcs.verify_branch(&name) {
            Ok(check) => {
                if checked_out.is_ok()
                    && check.exists
                    && check.head.as_deref() == Some(name.as_str())
                {
                    info!(spec_id = %spec_id, branch = %name, from = %original, "Created spec branch");
                    return Ok(BranchOutcome::Created {
                        name,
                        from: original,
                    });
                }
                let observed = if !check.exists {
                    "<missing>".to_string()
                } else {
                    check.head.unwrap_or_else(|| "<detached>".to_string())
                };
                (check.exists, observed)
            }
            Err(e) => (true, format!("verification error: {:#}", e)),
        };

        warn!(spec_id = %spec_id, expected = %name, observed = %observed, "Branch verification failed, rolling back");
        if let Err(e) = self.vcs.checkout(&original) {
            warn!(branch = %original, error = %format!("{:#}", e), "Failed to restore original branch");
        }
        if exists
            && let Err(e) = self.vcs.delete_branch(&name)
        {
            warn!(branch = %name, error = %format!("{:#}", e), "Failed to delete unverified branch");
        }
        Err(SpecError::BranchVerificationFailed {
            expected: name,
            observed,
        })
    }
}
