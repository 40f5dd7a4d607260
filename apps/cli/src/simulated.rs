//! Deterministic stand-in for real agent backends.
//!
//! Every agent answers immediately (plus an optional fixed latency). Quality
//! follows how well the agent's capabilities match the session's
//! requirements, so sessions settle the same way on every run.

use async_trait::async_trait;
use sadp_orchestrator::{
    Agent, AgentExecutor, CollaborationMode, DispatchPlan, PlanStep, Priority, Result,
    TaskOutput, TaskRequest, WorkResult,
};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Artifact every agent writes in parallel sessions, so the resolver has
/// something to decide.
pub const SHARED_ARTIFACT: &str = "summary";

/// Simulated executor.
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecutor {
    roster: Vec<Agent>,
    latency: Duration,
}

impl SimulatedExecutor {
    /// Creates an executor that plans over the given agents.
    pub fn new(roster: impl IntoIterator<Item = Agent>) -> Self {
        Self { roster: roster.into_iter().collect(), latency: Duration::ZERO }
    }

    /// Adds a fixed delay to every answer.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Planner output: the planner outlines, every other qualifying agent
    /// then works concurrently on the outline.
    fn plan(&self, planner: &Agent, request: &TaskRequest) -> DispatchPlan {
        let outline = PlanStep::new(planner.id.clone(), format!("Outline: {}", request.description));
        let followers: Vec<PlanStep> = self
            .roster
            .iter()
            .filter(|agent| agent.id != planner.id)
            .filter(|agent| agent.qualifies_for(&request.required_capabilities))
            .map(|agent| {
                PlanStep::new(agent.id.clone(), format!("Build on the outline: {}", request.description))
            })
            .collect();

        if followers.is_empty() {
            DispatchPlan::ordered(vec![outline])
        } else {
            DispatchPlan::grouped(vec![vec![outline], followers])
        }
    }

    fn work(agent: &Agent, request: &TaskRequest) -> WorkResult {
        let quality = quality_for(agent, request);
        let mut work = WorkResult::new(format!("{} handled '{}'", agent.name, request.description), quality)
            .with_artifact(
                format!("{}.round{}", agent.id, request.round),
                json!({
                    "agent": agent.id,
                    "task": request.description,
                    "builds_on": request.context.artifacts.keys().collect::<Vec<_>>(),
                }),
            );

        if request.mode == Some(CollaborationMode::Parallel) {
            work = work
                .with_artifact(SHARED_ARTIFACT, json!(format!("{} view of the task", agent.name)))
                .with_priority(SHARED_ARTIFACT, request.priority);
        }
        work
    }
}

/// 90 with no requirements, otherwise 60 plus up to 40 for capability coverage.
#[allow(clippy::cast_precision_loss)]
fn quality_for(agent: &Agent, request: &TaskRequest) -> f64 {
    let required = &request.required_capabilities;
    if required.is_empty() {
        return 90.0;
    }
    let matched = agent.capabilities.intersection(required).count();
    60.0 + 40.0 * matched as f64 / required.len() as f64
}

#[async_trait]
impl AgentExecutor for SimulatedExecutor {
    async fn execute(&self, agent: &Agent, request: &TaskRequest) -> Result<TaskOutput> {
        debug!(
            agent_id = %agent.id,
            task_id = %request.task_id,
            round = request.round,
            planning = request.planning,
            "Simulating agent"
        );
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if request.planning {
            return Ok(TaskOutput::Plan(self.plan(agent, request)));
        }
        Ok(TaskOutput::Work(Self::work(agent, request)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sadp_orchestrator::SessionOutput;
    use std::collections::BTreeSet;

    fn request(mode: Option<CollaborationMode>, capabilities: &[&str], planning: bool) -> TaskRequest {
        TaskRequest {
            task_id: "task-1".to_string(),
            session_id: Some("session-1".to_string()),
            mode,
            round: 2,
            attempt: 1,
            description: "design the onboarding flow".to_string(),
            required_capabilities: capabilities.iter().map(|c| (*c).to_string()).collect(),
            quality_threshold: 0.0,
            priority: Priority::Medium,
            planning,
            context: SessionOutput::default(),
        }
    }

    fn agent(id: &str, capabilities: &[&str]) -> Agent {
        Agent::new(id, id.to_uppercase(), capabilities.iter().copied())
    }

    fn roster() -> Vec<Agent> {
        vec![
            agent("claude", &["strategy", "documentation"]),
            agent("cursor_ai", &["code", "testing"]),
            agent("figma_ai", &["design", "ux"]),
        ]
    }

    #[tokio::test]
    async fn test_planner_outlines_then_fans_out() {
        let executor = SimulatedExecutor::new(roster());
        let planner = agent("claude", &["strategy"]);

        let output = executor.execute(&planner, &request(None, &[], true)).await.unwrap();
        let TaskOutput::Plan(plan) = output else { panic!("expected a plan") };

        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[0][0].agent_id, "claude");
        let followers: BTreeSet<_> = plan.stages[1].iter().map(|s| s.agent_id.as_str()).collect();
        assert_eq!(followers, BTreeSet::from(["cursor_ai", "figma_ai"]));
    }

    #[tokio::test]
    async fn test_lone_planner_plans_for_itself() {
        let executor = SimulatedExecutor::new([agent("claude", &["strategy"])]);
        let planner = agent("claude", &["strategy"]);

        let output = executor.execute(&planner, &request(None, &[], true)).await.unwrap();
        let TaskOutput::Plan(plan) = output else { panic!("expected a plan") };
        assert_eq!(plan.step_count(), 1);
    }

    #[tokio::test]
    async fn test_plan_skips_unqualified_followers() {
        let executor = SimulatedExecutor::new(roster());
        let planner = agent("cursor_ai", &["code", "testing"]);

        let output = executor.execute(&planner, &request(None, &["code", "ux"], true)).await.unwrap();
        let TaskOutput::Plan(plan) = output else { panic!("expected a plan") };

        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[0][0].agent_id, "cursor_ai");
        let followers: Vec<_> = plan.stages[1].iter().map(|s| s.agent_id.as_str()).collect();
        assert_eq!(followers, ["figma_ai"]);
    }

    #[tokio::test]
    async fn test_quality_follows_capability_coverage() {
        let executor = SimulatedExecutor::default();
        let designer = agent("figma_ai", &["design", "ux"]);

        let full = executor.execute(&designer, &request(None, &["design"], false)).await.unwrap();
        let half =
            executor.execute(&designer, &request(None, &["design", "code"], false)).await.unwrap();
        let open = executor.execute(&designer, &request(None, &[], false)).await.unwrap();

        assert!((full.as_work().unwrap().quality_score - 100.0).abs() < f64::EPSILON);
        assert!((half.as_work().unwrap().quality_score - 80.0).abs() < f64::EPSILON);
        assert!((open.as_work().unwrap().quality_score - 90.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_parallel_work_shares_summary_artifact() {
        let executor = SimulatedExecutor::default();
        let coder = agent("cursor_ai", &["code"]);

        let parallel = executor
            .execute(&coder, &request(Some(CollaborationMode::Parallel), &[], false))
            .await
            .unwrap();
        let sequential = executor
            .execute(&coder, &request(Some(CollaborationMode::Sequential), &[], false))
            .await
            .unwrap();

        let parallel = parallel.as_work().unwrap();
        assert!(parallel.artifacts.contains_key(SHARED_ARTIFACT));
        assert!(parallel.artifacts.contains_key("cursor_ai.round2"));
        assert!(!sequential.as_work().unwrap().artifacts.contains_key(SHARED_ARTIFACT));
    }
}
