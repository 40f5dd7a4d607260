//! Collaboration session lifecycle.
//!
//! This module defines the session status set and the transition table the
//! session driver is held to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Collaboration session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Request validated and stored.
    Created,
    /// Task Distributor is building the dispatch plan.
    Planning,
    /// Tasks are being dispatched and collected.
    InProgress,
    /// Blocked on an escalated conflict awaiting external resolution.
    ResolvingConflict,
    /// Every task is terminal and every conflict resolved.
    Completed,
    /// Planning or execution failed.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl SessionStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Created,
        Self::Planning,
        Self::InProgress,
        Self::ResolvingConflict,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Checks if the session can transition to the given status.
    ///
    /// # Arguments
    /// * `to` - The target status
    ///
    /// # Returns
    /// Returns `true` if the transition is valid, `false` otherwise.
    #[must_use]
    #[allow(clippy::match_same_arms)] // Each arm represents a distinct transition rule
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            // Terminal statuses are immutable
            (Self::Completed | Self::Failed | Self::Cancelled, _) => false,
            // Failure and cancellation are reachable from any live status
            (_, Self::Failed | Self::Cancelled) => true,
            (Self::Created, Self::Planning) => true,
            (Self::Planning, Self::InProgress) => true,
            (Self::InProgress, Self::ResolvingConflict | Self::Completed) => true,
            (Self::ResolvingConflict, Self::InProgress) => true,
            _ => false,
        }
    }

    /// Whether the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the session has stopped making progress on its own, either
    /// because it finished or because it awaits external input.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || *self == Self::ResolvingConflict
    }

    /// Snake-case name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Planning => "planning",
            Self::InProgress => "in_progress",
            Self::ResolvingConflict => "resolving_conflict",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
