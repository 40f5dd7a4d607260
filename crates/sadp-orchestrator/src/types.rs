//! Core collaboration domain types.

use crate::error::{OrchestrationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Identifier of a registered agent.
pub type AgentId = String;

/// A capability tag such as `strategy`, `code` or `design`.
pub type Capability = String;

/// Live availability of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Ready to accept a reservation.
    Idle,
    /// Reserved by a session or a direct task.
    Busy,
    /// Taken out of rotation.
    Unavailable,
}

/// A named collaborator with declared capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// Capability tags, matched by set intersection.
    pub capabilities: BTreeSet<Capability>,
    /// Configured priority used as the first conflict tie-break.
    pub precedence: u32,
}

impl Agent {
    /// Creates a new agent.
    #[must_use]
    pub fn new<I, S>(id: impl Into<String>, name: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            precedence: 0,
        }
    }

    /// Sets the tie-break precedence.
    #[must_use]
    pub fn with_precedence(mut self, precedence: u32) -> Self {
        self.precedence = precedence;
        self
    }

    /// Whether the agent qualifies for the given requirement set.
    ///
    /// An empty requirement set is satisfied by every agent.
    #[must_use]
    pub fn qualifies_for(&self, required: &BTreeSet<Capability>) -> bool {
        required.is_empty() || !self.capabilities.is_disjoint(required)
    }
}

/// Workflow protocol of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationMode {
    /// One task at a time, in participant order.
    Sequential,
    /// All tasks at once, barrier before completion.
    Parallel,
    /// Bounded concurrent rounds until a completion predicate holds.
    Interactive,
    /// A planner participant produces the dispatch plan.
    Autonomous,
}

impl CollaborationMode {
    /// Snake-case name of the mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Interactive => "interactive",
            Self::Autonomous => "autonomous",
        }
    }
}

impl fmt::Display for CollaborationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollaborationMode {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "interactive" => Ok(Self::Interactive),
            "autonomous" => Ok(Self::Autonomous),
            other => Err(OrchestrationError::Validation(format!(
                "unknown collaboration mode '{other}' (expected sequential, parallel, interactive or autonomous)"
            ))),
        }
    }
}

/// Request and task priority.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Low priority.
    Low,
    /// Medium priority.
    #[default]
    Medium,
    /// High priority.
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

impl FromStr for Priority {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(OrchestrationError::Validation(format!("unknown priority '{other}'"))),
        }
    }
}

/// What a session demands of its participants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    /// Required capability tags.
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    /// Minimum self-reported quality score (0-100).
    #[serde(default)]
    pub quality_threshold: f64,
}

impl Requirements {
    /// Creates requirements from capability tags and a quality threshold.
    #[must_use]
    pub fn new<I, S>(capabilities: I, quality_threshold: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            quality_threshold,
        }
    }
}

/// A request to start a collaboration session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationRequest {
    /// Session title.
    pub title: String,
    /// What the collaborators should produce.
    pub description: String,
    /// Workflow mode.
    pub mode: CollaborationMode,
    /// Ordered participant agent IDs.
    pub participants: Vec<AgentId>,
    /// Capability and quality requirements.
    #[serde(default)]
    pub requirements: Requirements,
    /// Session priority, inherited by its tasks.
    #[serde(default)]
    pub priority: Priority,
    /// Planner participant for autonomous mode (defaults to the first qualifying participant).
    #[serde(default)]
    pub planner: Option<AgentId>,
    /// Optional wall-clock deadline.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl CollaborationRequest {
    /// Creates a request with default requirements and medium priority.
    #[must_use]
    pub fn new<I, S>(
        title: impl Into<String>,
        description: impl Into<String>,
        mode: CollaborationMode,
        participants: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            title: title.into(),
            description: description.into(),
            mode,
            participants: participants.into_iter().map(Into::into).collect(),
            requirements: Requirements::default(),
            priority: Priority::default(),
            planner: None,
            deadline: None,
        }
    }

    /// Sets the requirements.
    #[must_use]
    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Designates the autonomous-mode planner.
    #[must_use]
    pub fn with_planner(mut self, planner: impl Into<String>) -> Self {
        self.planner = Some(planner.into());
        self
    }

    /// Sets a deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Boundary validation of the request shape.
    ///
    /// Registry membership is checked later, during planning.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(OrchestrationError::Validation("title must not be empty".to_string()));
        }
        if self.participants.is_empty() {
            return Err(OrchestrationError::Validation(
                "participants must not be empty".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for participant in &self.participants {
            if participant.trim().is_empty() {
                return Err(OrchestrationError::Validation(
                    "participant IDs must not be empty".to_string(),
                ));
            }
            if !seen.insert(participant.as_str()) {
                return Err(OrchestrationError::Validation(format!(
                    "participant '{participant}' listed more than once"
                )));
            }
        }
        let threshold = self.requirements.quality_threshold;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(OrchestrationError::Validation(format!(
                "quality_threshold must be within 0..=100, got {threshold}"
            )));
        }
        if let Some(planner) = &self.planner {
            if !self.participants.contains(planner) {
                return Err(OrchestrationError::Validation(format!(
                    "planner '{planner}' is not a participant"
                )));
            }
        }
        Ok(())
    }
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet handed to an agent.
    Pending,
    /// Handed to an agent, awaiting its result.
    Dispatched,
    /// Produced a result.
    Succeeded,
    /// Exhausted its retry budget.
    Failed,
    /// Abandoned because its session was cancelled.
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// A unit of work assigned to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task ID.
    pub id: String,
    /// Owning session, absent for direct tasks.
    pub session_id: Option<String>,
    /// Assigned agent.
    pub agent_id: AgentId,
    /// What the agent is asked to do.
    pub description: String,
    /// Dispatch round (1-based) within the session.
    pub round: u32,
    /// Creation order within the session.
    pub sequence: usize,
    /// Current status.
    pub status: TaskStatus,
    /// Inherited or overridden priority.
    pub priority: Priority,
    /// Whether this is the autonomous planner's task.
    pub planning: bool,
    /// Attempts made so far.
    pub attempts: u32,
    /// Result payload, opaque to the core except for conflict facets.
    pub result: Option<crate::executor::TaskOutput>,
    /// Last failure reason.
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a pending task.
    #[must_use]
    pub fn new(
        session_id: Option<String>,
        agent_id: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            session_id,
            agent_id: agent_id.into(),
            description: description.into(),
            round: 0,
            sequence: 0,
            status: TaskStatus::Pending,
            priority,
            planning: false,
            attempts: 0,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Places the task in a dispatch round.
    #[must_use]
    pub fn in_round(mut self, round: u32, sequence: usize) -> Self {
        self.round = round;
        self.sequence = sequence;
        self
    }

    /// Marks the task as the planner's task.
    #[must_use]
    pub fn as_planning(mut self) -> Self {
        self.planning = true;
        self
    }

    /// Records a terminal outcome.
    pub fn finish(&mut self, status: TaskStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// A task assigned directly to one agent, outside any session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectTaskRequest {
    /// Target agent.
    pub agent_id: AgentId,
    /// Task title.
    pub title: String,
    /// Task description.
    pub description: String,
    /// Task priority.
    #[serde(default)]
    pub priority: Priority,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(participants: &[&str]) -> CollaborationRequest {
        CollaborationRequest::new(
            "Platform",
            "Build it",
            CollaborationMode::Sequential,
            participants.iter().copied(),
        )
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Parallel".parse::<CollaborationMode>().unwrap(), CollaborationMode::Parallel);
        let err = "swarm".parse::<CollaborationMode>().unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn test_priority_parsing_and_order() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!("critical".parse::<Priority>().is_err());
    }

    #[test]
    fn test_empty_participants_rejected() {
        let err = request(&[]).validate().unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));
    }

    #[test]
    fn test_duplicate_participants_rejected() {
        assert!(request(&["claude", "claude"]).validate().is_err());
    }

    #[test]
    fn test_planner_must_participate() {
        let req = request(&["claude"]).with_planner("cursor_ai");
        assert!(req.validate().is_err());
        let req = request(&["claude", "cursor_ai"]).with_planner("cursor_ai");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_quality_threshold_bounds() {
        let req = request(&["claude"]).with_requirements(Requirements::new(["code"], 120.0));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_capability_qualification() {
        let agent = Agent::new("cursor_ai", "Cursor", ["code", "testing"]);
        assert!(agent.qualifies_for(&BTreeSet::new()));
        assert!(agent.qualifies_for(&["code".to_string(), "design".to_string()].into()));
        assert!(!agent.qualifies_for(&["design".to_string()].into()));
    }
}
