//! Task distribution.
//!
//! Turns a collaboration request into a per-mode distribution plan, matches
//! participants against required capabilities, validates autonomous dispatch
//! plans and mints task records. Every check here runs before the first task
//! is dispatched.

use crate::error::{OrchestrationError, Result};
use crate::executor::{DispatchPlan, PlanStep};
use crate::registry::AgentRegistry;
use crate::types::{
    Agent, AgentId, AgentStatus, CollaborationMode, CollaborationRequest, Priority, Task,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// How a session's tasks are to be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributionPlan {
    /// One task per agent, strictly in this order.
    Sequential(Vec<Agent>),
    /// One task per agent, all at once.
    Parallel(Vec<Agent>),
    /// Concurrent rounds over these agents, bounded by `max_rounds`.
    Interactive {
        /// Qualifying participants.
        participants: Vec<Agent>,
        /// Round limit.
        max_rounds: u32,
    },
    /// The planner's first task yields the plan for the rest.
    Autonomous {
        /// Planner participant.
        planner: Agent,
        /// Qualifying participants a plan may reference.
        participants: Vec<Agent>,
    },
}

impl DistributionPlan {
    /// Agents that may receive work tasks under this plan.
    #[must_use]
    pub fn assignees(&self) -> &[Agent] {
        match self {
            Self::Sequential(agents) | Self::Parallel(agents) => agents,
            Self::Interactive { participants, .. } | Self::Autonomous { participants, .. } => {
                participants
            }
        }
    }
}

/// Summary of one interactive round handed to the completion policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    /// Round number (1-based).
    pub round: u32,
    /// Configured round limit.
    pub max_rounds: u32,
    /// Session quality bar.
    pub quality_threshold: f64,
    /// Quality score reported by each agent this round.
    pub quality_scores: Vec<(AgentId, f64)>,
    /// Conflicts detected this round.
    pub conflicts_detected: usize,
    /// Of those, how many had to be escalated.
    pub conflicts_escalated: usize,
}

/// Decides whether an interactive session needs another round.
pub trait RoundCompletionPolicy: Send + Sync {
    /// Returns `true` when the round's outcome is good enough to finish.
    fn is_complete(&self, outcome: &RoundOutcome) -> bool;
}

impl<F> RoundCompletionPolicy for F
where
    F: Fn(&RoundOutcome) -> bool + Send + Sync,
{
    fn is_complete(&self, outcome: &RoundOutcome) -> bool {
        self(outcome)
    }
}

/// Complete once a round is conflict-free and every agent meets the quality bar.
#[derive(Debug, Default, Clone, Copy)]
pub struct QualityThresholdPolicy;

impl RoundCompletionPolicy for QualityThresholdPolicy {
    fn is_complete(&self, outcome: &RoundOutcome) -> bool {
        outcome.conflicts_detected == 0
            && outcome.quality_scores.iter().all(|(_, score)| *score >= outcome.quality_threshold)
    }
}

/// Builds distribution plans and task records.
pub struct TaskDistributor {
    max_rounds: u32,
}

impl fmt::Debug for TaskDistributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDistributor").field("max_rounds", &self.max_rounds).finish()
    }
}

impl TaskDistributor {
    /// Creates a distributor with the interactive round limit.
    #[must_use]
    pub fn new(max_rounds: u32) -> Self {
        Self { max_rounds }
    }

    /// Interactive round limit.
    #[must_use]
    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Resolves participants against the registry and builds the plan.
    ///
    /// # Errors
    /// `UnknownAgent` / `AgentUnavailable` for a bad participant,
    /// `UnsatisfiableRequirement` when a required capability is uncovered,
    /// `InvalidPlan` when an explicit planner does not qualify.
    pub async fn plan(
        &self,
        registry: &AgentRegistry,
        request: &CollaborationRequest,
    ) -> Result<DistributionPlan> {
        let mut participants = Vec::with_capacity(request.participants.len());
        for id in &request.participants {
            let agent = registry.lookup(id).await?;
            if registry.status(id).await? == AgentStatus::Unavailable {
                return Err(OrchestrationError::AgentUnavailable(id.clone()));
            }
            participants.push(agent);
        }

        let qualifying = match_capabilities(&participants, request)?;
        debug!(
            mode = %request.mode,
            qualifying = ?qualifying.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(),
            "Participants matched"
        );

        Ok(match request.mode {
            CollaborationMode::Sequential => DistributionPlan::Sequential(qualifying),
            CollaborationMode::Parallel => DistributionPlan::Parallel(qualifying),
            CollaborationMode::Interactive => DistributionPlan::Interactive {
                participants: qualifying,
                max_rounds: self.max_rounds,
            },
            CollaborationMode::Autonomous => {
                let planner = match &request.planner {
                    Some(id) => qualifying.iter().find(|a| &a.id == id).cloned().ok_or_else(|| {
                        OrchestrationError::InvalidPlan(format!(
                            "planner '{id}' does not offer any required capability"
                        ))
                    })?,
                    None => qualifying.first().cloned().ok_or_else(|| {
                        OrchestrationError::Validation("no qualifying participant to plan".to_string())
                    })?,
                };
                DistributionPlan::Autonomous { planner, participants: qualifying }
            }
        })
    }

    /// Validates a planner's dispatch plan before any of it is issued.
    ///
    /// Every step must name a qualifying session participant that holds the
    /// step's own capability demands.
    ///
    /// # Errors
    /// `InvalidPlan` describing the first offending step.
    pub async fn validate_plan(
        &self,
        registry: &AgentRegistry,
        participants: &[Agent],
        plan: &DispatchPlan,
    ) -> Result<Vec<Vec<PlanStep>>> {
        if plan.stages.is_empty() {
            return Err(OrchestrationError::InvalidPlan("plan has no stages".to_string()));
        }

        for (index, stage) in plan.stages.iter().enumerate() {
            if stage.is_empty() {
                return Err(OrchestrationError::InvalidPlan(format!("stage {} is empty", index + 1)));
            }
            for step in stage {
                if !registry.is_registered(&step.agent_id).await {
                    return Err(OrchestrationError::InvalidPlan(format!(
                        "stage {} references unknown agent '{}'",
                        index + 1,
                        step.agent_id
                    )));
                }
                let Some(agent) = participants.iter().find(|a| a.id == step.agent_id) else {
                    return Err(OrchestrationError::InvalidPlan(format!(
                        "agent '{}' is not a qualifying participant",
                        step.agent_id
                    )));
                };
                if let Some(missing) =
                    step.capabilities.iter().find(|c| !agent.capabilities.contains(*c))
                {
                    return Err(OrchestrationError::InvalidPlan(format!(
                        "agent '{}' lacks capability '{missing}'",
                        step.agent_id
                    )));
                }
            }
        }

        debug!(stages = plan.stages.len(), steps = plan.step_count(), "Dispatch plan validated");
        Ok(plan.stages.clone())
    }

    /// Mints a pending task for a session.
    #[must_use]
    pub fn create_task(
        &self,
        session_id: &str,
        agent_id: &str,
        description: &str,
        priority: Priority,
        round: u32,
        sequence: usize,
    ) -> Task {
        Task::new(Some(session_id.to_string()), agent_id, description, priority)
            .in_round(round, sequence)
    }
}

/// Filters participants down to those whose capabilities intersect the
/// requirement set, failing if any required capability is uncovered.
///
/// Participant order is preserved.
pub fn match_capabilities(
    participants: &[Agent],
    request: &CollaborationRequest,
) -> Result<Vec<Agent>> {
    let required = &request.requirements.capabilities;
    if let Some(capability) =
        required.iter().find(|cap| !participants.iter().any(|a| a.capabilities.contains(*cap)))
    {
        warn!(capability = %capability, "No participant offers required capability");
        return Err(OrchestrationError::UnsatisfiableRequirement { capability: capability.clone() });
    }

    Ok(participants.iter().filter(|a| a.qualifies_for(required)).cloned().collect())
}
