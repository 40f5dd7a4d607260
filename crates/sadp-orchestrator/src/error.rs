// Error types for collaboration orchestration

use crate::lifecycle::SessionStatus;
use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    /// Malformed request, rejected before it reaches the core
    #[error("Invalid request: {0}")]
    Validation(String),

    /// An agent with the same ID is already registered
    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    /// Agent lookup miss
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// Session lookup miss
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Direct task lookup miss
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// Conflict lookup miss
    #[error("Unknown conflict '{conflict_id}' in session {session_id}")]
    UnknownConflict {
        /// Session ID
        session_id: String,
        /// Conflict ID
        conflict_id: String,
    },

    /// Agent is not idle and cannot be reserved
    #[error("Agent is busy: {0}")]
    AgentBusy(String),

    /// Agent is marked unavailable
    #[error("Agent is unavailable: {0}")]
    AgentUnavailable(String),

    /// No participant offers a required capability
    #[error("No participant offers required capability '{capability}'")]
    UnsatisfiableRequirement {
        /// The capability nobody provides
        capability: String,
    },

    /// Autonomous planner produced a plan that cannot be issued
    #[error("Invalid dispatch plan: {0}")]
    InvalidPlan(String),

    /// Interactive mode ran out of rounds
    #[error("Session did not converge within {rounds} rounds")]
    ConvergenceTimeout {
        /// Rounds executed
        rounds: u32,
    },

    /// A task exhausted its retry budget
    #[error("Task {task_id} on agent {agent_id} failed after {attempts} attempts: {reason}")]
    TaskFailed {
        /// Task ID
        task_id: String,
        /// Agent ID
        agent_id: String,
        /// Attempts made
        attempts: u32,
        /// Last failure reason
        reason: String,
    },

    /// A single task attempt exceeded its time limit
    #[error("Task attempt timed out after {0}ms")]
    TaskTimeout(u64),

    /// Agent executor reported a failure
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Session state machine rejected a transition
    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: SessionStatus,
        /// Requested status
        to: SessionStatus,
    },

    /// External resolution supplied to a session that is not waiting for one
    #[error("Session {0} is not awaiting conflict resolution")]
    SessionNotBlocked(String),

    /// Conflict already carries a final decision
    #[error("Conflict {0} is already resolved")]
    ConflictAlreadyResolved(String),

    /// Operation requires a non-terminal session
    #[error("Session {0} has already finished")]
    SessionTerminal(String),

    /// Operation requires a terminal session
    #[error("Session {0} is still active")]
    SessionActive(String),

    /// Operation requires a finished direct task
    #[error("Task {0} is still running")]
    TaskActive(String),

    /// Session deadline elapsed before completion
    #[error("Session deadline exceeded")]
    DeadlineExceeded,

    /// Session cancelled by the caller
    #[error("Session cancelled")]
    Cancelled,

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(String),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(String),
}

impl OrchestrationError {
    /// Stable machine-readable code recorded on failed sessions.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::DuplicateAgent(_) => "duplicate_agent",
            Self::UnknownAgent(_) => "unknown_agent",
            Self::UnknownSession(_) => "unknown_session",
            Self::UnknownTask(_) => "unknown_task",
            Self::UnknownConflict { .. } => "unknown_conflict",
            Self::AgentBusy(_) => "agent_busy",
            Self::AgentUnavailable(_) => "agent_unavailable",
            Self::UnsatisfiableRequirement { .. } => "unsatisfiable_requirement",
            Self::InvalidPlan(_) => "invalid_plan",
            Self::ConvergenceTimeout { .. } => "convergence_timeout",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskTimeout(_) => "task_timeout",
            Self::Execution(_) => "execution",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::SessionNotBlocked(_) => "session_not_blocked",
            Self::ConflictAlreadyResolved(_) => "conflict_already_resolved",
            Self::SessionTerminal(_) => "session_terminal",
            Self::SessionActive(_) => "session_active",
            Self::TaskActive(_) => "task_active",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Toml(_) => "toml",
        }
    }

    /// Whether the caller may simply retry the operation later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AgentBusy(_) | Self::TaskTimeout(_))
    }
}

impl From<std::io::Error> for OrchestrationError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<toml::de::Error> for OrchestrationError {
    fn from(err: toml::de::Error) -> Self {
        Self::Toml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            OrchestrationError::UnsatisfiableRequirement { capability: "design".to_string() }
                .code(),
            "unsatisfiable_requirement"
        );
        assert_eq!(OrchestrationError::ConvergenceTimeout { rounds: 3 }.code(), "convergence_timeout");
        assert_eq!(OrchestrationError::InvalidPlan("empty".to_string()).code(), "invalid_plan");
    }

    #[test]
    fn test_transient_errors() {
        assert!(OrchestrationError::AgentBusy("claude".to_string()).is_transient());
        assert!(!OrchestrationError::UnknownAgent("claude".to_string()).is_transient());
    }

    #[test]
    fn test_display_includes_context() {
        let err = OrchestrationError::InvalidTransition {
            from: SessionStatus::Completed,
            to: SessionStatus::InProgress,
        };
        assert_eq!(err.to_string(), "Invalid session transition from completed to in_progress");
    }
}
