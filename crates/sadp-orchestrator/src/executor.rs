//! Agent execution seam.
//!
//! The core never talks to a generative-AI service itself. Whatever actually
//! runs an agent implements [`AgentExecutor`] and is injected into the
//! orchestrator.

use crate::error::Result;
use crate::types::{Agent, AgentId, Capability, CollaborationMode, Priority};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Accepted output of a session so far, keyed per conflict facet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOutput {
    /// Artifact key to accepted value.
    pub artifacts: BTreeMap<String, Value>,
    /// Exclusive resource to the agent holding it.
    pub claims: BTreeMap<String, AgentId>,
    /// Work item to accepted priority.
    pub priorities: BTreeMap<String, Priority>,
}

impl SessionOutput {
    /// Whether nothing has been accepted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.claims.is_empty() && self.priorities.is_empty()
    }
}

/// Everything an agent is told about the task it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Task ID.
    pub task_id: String,
    /// Owning session, absent for direct tasks.
    pub session_id: Option<String>,
    /// Session mode, absent for direct tasks.
    pub mode: Option<CollaborationMode>,
    /// Dispatch round (1-based).
    pub round: u32,
    /// Attempt number (1-based).
    pub attempt: u32,
    /// What to do.
    pub description: String,
    /// Capabilities the session requires.
    pub required_capabilities: BTreeSet<Capability>,
    /// Quality bar the session expects.
    pub quality_threshold: f64,
    /// Task priority.
    pub priority: Priority,
    /// Set on the autonomous planner's task: a [`DispatchPlan`] is expected back.
    pub planning: bool,
    /// Accepted output of earlier tasks, rounds or stages.
    pub context: SessionOutput,
}

/// Work produced by an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    /// Short human-readable summary.
    #[serde(default)]
    pub summary: String,
    /// Produced artifacts by key.
    #[serde(default)]
    pub artifacts: BTreeMap<String, Value>,
    /// Exclusive resources the work needs.
    #[serde(default)]
    pub claims: BTreeSet<String>,
    /// Proposed priorities for work items.
    #[serde(default)]
    pub priorities: BTreeMap<String, Priority>,
    /// Self-reported quality score (0-100).
    #[serde(default)]
    pub quality_score: f64,
}

impl WorkResult {
    /// Creates an empty result with a summary and quality score.
    #[must_use]
    pub fn new(summary: impl Into<String>, quality_score: f64) -> Self {
        Self { summary: summary.into(), quality_score, ..Self::default() }
    }

    /// Adds an artifact.
    #[must_use]
    pub fn with_artifact(mut self, key: impl Into<String>, value: Value) -> Self {
        self.artifacts.insert(key.into(), value);
        self
    }

    /// Adds an exclusive resource claim.
    #[must_use]
    pub fn with_claim(mut self, resource: impl Into<String>) -> Self {
        self.claims.insert(resource.into());
        self
    }

    /// Proposes a priority for a work item.
    #[must_use]
    pub fn with_priority(mut self, item: impl Into<String>, priority: Priority) -> Self {
        self.priorities.insert(item.into(), priority);
        self
    }
}

/// One follow-up task in an autonomous plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Agent to run the step.
    pub agent_id: AgentId,
    /// What the step does.
    pub description: String,
    /// Capabilities the step needs from its agent.
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

impl PlanStep {
    /// Creates a step with no extra capability demands.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            description: description.into(),
            capabilities: BTreeSet::new(),
        }
    }

    /// Requires a capability of the step's agent.
    #[must_use]
    pub fn requiring(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }
}

/// A planner's dispatch plan: stages run in order, steps within a stage run
/// concurrently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchPlan {
    /// Ordered stages.
    pub stages: Vec<Vec<PlanStep>>,
}

impl DispatchPlan {
    /// A plan where every step runs alone, in order.
    #[must_use]
    pub fn ordered(steps: Vec<PlanStep>) -> Self {
        Self { stages: steps.into_iter().map(|step| vec![step]).collect() }
    }

    /// A plan made of concurrent groups.
    #[must_use]
    pub fn grouped(stages: Vec<Vec<PlanStep>>) -> Self {
        Self { stages }
    }

    /// Total number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }
}

/// What an agent hands back: either work, or a plan for more work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutput {
    /// Regular work product.
    Work(WorkResult),
    /// A dispatch plan (autonomous planner only).
    Plan(DispatchPlan),
}

impl TaskOutput {
    /// The work result, if this is one.
    #[must_use]
    pub fn as_work(&self) -> Option<&WorkResult> {
        match self {
            Self::Work(work) => Some(work),
            Self::Plan(_) => None,
        }
    }
}

/// Runs agents on behalf of the orchestrator.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Executes one task attempt on the given agent.
    ///
    /// # Errors
    /// Any error counts as a failed attempt and is retried within the budget.
    async fn execute(&self, agent: &Agent, request: &TaskRequest) -> Result<TaskOutput>;
}

/// Executor that echoes the task description back as a single artifact.
///
/// Planning requests receive a plan that hands the description to the
/// planner itself.
#[derive(Debug, Default, Clone)]
pub struct EchoExecutor;

#[async_trait]
impl AgentExecutor for EchoExecutor {
    async fn execute(&self, agent: &Agent, request: &TaskRequest) -> Result<TaskOutput> {
        debug!(agent_id = %agent.id, task_id = %request.task_id, "EchoExecutor executing");
        if request.planning {
            return Ok(TaskOutput::Plan(DispatchPlan::ordered(vec![PlanStep::new(
                agent.id.clone(),
                request.description.clone(),
            )])));
        }
        Ok(TaskOutput::Work(
            WorkResult::new(format!("Echo from {}", agent.id), 100.0).with_artifact(
                format!("{}.output", agent.id),
                Value::String(request.description.clone()),
            ),
        ))
    }
}
