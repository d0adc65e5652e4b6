//! Spec lifecycle phases and the transition table between them.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle phase of a spec.
///
/// `tasks` was once a phase of its own between design and implementation.
/// It is still accepted on input (and in stored records) but always
/// resolves to [`Phase::Design`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Requirements,
    #[serde(alias = "tasks")]
    Design,
    Implementation,
    Review,
    Completed,
}

/// Canonical forward edges of the lifecycle.
pub const TRANSITIONS: &[(Phase, Phase)] = &[
    (Phase::Requirements, Phase::Design),
    (Phase::Design, Phase::Implementation),
    (Phase::Implementation, Phase::Review),
    (Phase::Review, Phase::Completed),
];

/// How a requested transition relates to the canonical order.
///
/// None of these are rejected: operators may move a spec backward or skip
/// ahead to correct mistakes. The classification is used for logging and
/// for reporting back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Unchanged,
    /// Follows an edge in [`TRANSITIONS`].
    Advance,
    /// Forward, but jumps over at least one phase.
    Skip,
    /// Backward move.
    Revert,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Invalid phase '{input}'. Valid values: requirements, design, implementation, review, completed"
)]
pub struct PhaseParseError {
    pub input: String,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Requirements,
            Phase::Design,
            Phase::Implementation,
            Phase::Review,
            Phase::Completed,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Requirements => "requirements",
            Phase::Design => "design",
            Phase::Implementation => "implementation",
            Phase::Review => "review",
            Phase::Completed => "completed",
        }
    }

    /// The phase that follows this one, if any.
    pub fn next(self) -> Option<Phase> {
        TRANSITIONS
            .iter()
            .find(|(from, _)| *from == self)
            .map(|(_, to)| *to)
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }

    pub fn transition_kind(self, to: Phase) -> TransitionKind {
        if self == to {
            TransitionKind::Unchanged
        } else if TRANSITIONS.contains(&(self, to)) {
            TransitionKind::Advance
        } else if to > self {
            TransitionKind::Skip
        } else {
            TransitionKind::Revert
        }
    }

    /// Whether `input` is only accepted for backward compatibility.
    pub fn is_deprecated_alias(input: &str) -> bool {
        matches!(input.trim().to_lowercase().as_str(), "tasks" | "task")
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Phase {
    type Err = PhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "requirements" | "requirement" | "reqs" | "req" => Ok(Phase::Requirements),
            "design" | "des" | "tasks" | "task" => Ok(Phase::Design),
            "implementation" | "implement" | "impl" => Ok(Phase::Implementation),
            "review" | "rev" => Ok(Phase::Review),
            "completed" | "complete" | "done" => Ok(Phase::Completed),
            _ => Err(PhaseParseError {
                input: s.to_string(),
            }),
        }
    }
}
