//! Collaboration orchestrator for multi-agent development sessions.
//!
//! The [`Orchestrator`] owns the agent registry, spawns one driver per
//! collaboration session and exposes the request/response operations a
//! transport (HTTP, CLI) binds to. Talking to an actual agent is delegated to
//! an injected [`AgentExecutor`].

pub mod config;
pub mod conflict;
pub mod distributor;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod types;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, info, warn};

pub use config::{AgentConfig, OrchestratorConfig, OrchestratorSettings};
pub use conflict::{
    Candidate, Conflict, ConflictKind, ConflictResolver, Decision, PriorityTieBreak,
    QualityTieBreak, Resolution, ResolutionMethod, ResolutionStrategy, RoundResult,
};
pub use distributor::{
    DistributionPlan, QualityThresholdPolicy, RoundCompletionPolicy, RoundOutcome,
    TaskDistributor,
};
pub use error::{OrchestrationError, Result};
pub use executor::{
    AgentExecutor, DispatchPlan, EchoExecutor, PlanStep, SessionOutput, TaskOutput, TaskRequest,
    WorkResult,
};
pub use lifecycle::SessionStatus;
pub use metrics::{AgentStats, MetricsCollector, MetricsEvent, MetricsSnapshot};
pub use registry::{AgentRegistry, AgentSnapshot, Reservation};
pub use session::{
    AcceptedResult, CollaborationSession, SessionFailure, SessionReceipt, SessionSummary,
};
pub use types::{
    Agent, AgentId, AgentStatus, Capability, CollaborationMode, CollaborationRequest,
    DirectTaskRequest, Priority, Requirements, Task, TaskStatus,
};

use session::{SessionContext, SessionDriver, SessionHandle, TaskRunner};

/// Returned when a direct task is accepted.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DirectTaskReceipt {
    /// New task ID.
    pub task_id: String,
}

struct DirectTaskHandle {
    task: Mutex<Task>,
    done: watch::Sender<bool>,
}

impl DirectTaskHandle {
    fn lock(&self) -> MutexGuard<'_, Task> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Entry point of the collaboration core.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    registry: Arc<AgentRegistry>,
    metrics: Arc<MetricsCollector>,
    resolver: Arc<ConflictResolver>,
    distributor: Arc<TaskDistributor>,
    policy: Arc<dyn RoundCompletionPolicy>,
    runner: TaskRunner,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    direct_tasks: RwLock<HashMap<String, Arc<DirectTaskHandle>>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with an empty registry.
    #[must_use]
    pub fn new(settings: OrchestratorSettings, executor: Arc<dyn AgentExecutor>) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let runner = TaskRunner::new(executor, Arc::clone(&registry), settings.clone());
        Self {
            distributor: Arc::new(TaskDistributor::new(settings.max_rounds)),
            settings,
            registry,
            metrics: Arc::new(MetricsCollector::new()),
            resolver: Arc::new(ConflictResolver::new()),
            policy: Arc::new(QualityThresholdPolicy),
            runner,
            sessions: RwLock::new(HashMap::new()),
            direct_tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Creates an orchestrator and registers every configured agent.
    ///
    /// # Errors
    /// `Config` for invalid settings, `DuplicateAgent` for repeated IDs.
    pub async fn from_config(
        config: &OrchestratorConfig,
        executor: Arc<dyn AgentExecutor>,
    ) -> Result<Self> {
        config.validate()?;
        let orchestrator = Self::new(config.settings.clone(), executor);
        for agent in &config.agents {
            orchestrator.register_agent(agent.to_agent()).await?;
        }
        info!(agents = config.agents.len(), "Orchestrator initialised");
        Ok(orchestrator)
    }

    /// Replaces the interactive round-completion policy.
    #[must_use]
    pub fn with_round_policy(mut self, policy: Arc<dyn RoundCompletionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the conflict resolution chain.
    #[must_use]
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Runtime settings.
    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// The shared agent registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Registers an agent.
    pub async fn register_agent(&self, agent: Agent) -> Result<()> {
        self.registry.register(agent).await
    }

    /// Registry snapshot of every agent.
    pub async fn list_agents(&self) -> Vec<AgentSnapshot> {
        self.registry.snapshot().await
    }

    /// Takes an agent out of rotation or returns it.
    pub async fn set_agent_availability(&self, agent_id: &str, available: bool) -> Result<AgentStatus> {
        self.registry.set_availability(agent_id, available).await
    }

    fn context(&self) -> SessionContext {
        SessionContext {
            registry: Arc::clone(&self.registry),
            metrics: Arc::clone(&self.metrics),
            resolver: Arc::clone(&self.resolver),
            distributor: Arc::clone(&self.distributor),
            policy: Arc::clone(&self.policy),
            runner: self.runner.clone(),
        }
    }

    /// Creates a session and starts driving it in the background.
    ///
    /// # Errors
    /// `Validation` for a malformed request. Registry and capability problems
    /// surface later as a failed session.
    pub async fn create_session(&self, request: CollaborationRequest) -> Result<SessionReceipt> {
        request.validate()?;
        let handle = SessionHandle::new(request, Arc::clone(&self.metrics));
        let session_id = handle.id().to_string();
        self.sessions.write().await.insert(session_id.clone(), Arc::clone(&handle));
        debug!(session_id = %session_id, "Session created");

        SessionDriver::spawn(&handle, self.context());
        Ok(SessionReceipt { session_id, status: SessionStatus::Created })
    }

    async fn handle(&self, session_id: &str) -> Result<Arc<SessionHandle>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::UnknownSession(session_id.to_string()))
    }

    /// Current state of a session.
    pub async fn session(&self, session_id: &str) -> Result<CollaborationSession> {
        Ok(self.handle(session_id).await?.snapshot())
    }

    /// Summaries of every retained session, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.sessions.read().await.values().map(|h| h.snapshot().summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// Waits until the session is terminal or blocked on an escalated
    /// conflict, then returns its state.
    pub async fn wait_for_session(&self, session_id: &str) -> Result<CollaborationSession> {
        let handle = self.handle(session_id).await?;
        let mut status = handle.subscribe();
        if status.wait_for(SessionStatus::is_settled).await.is_err() {
            warn!(session_id = %session_id, "Session status channel closed");
        }
        Ok(handle.snapshot())
    }

    /// Supplies the winner of an escalated conflict.
    ///
    /// # Errors
    /// `SessionNotBlocked` unless the session is in `resolving_conflict`,
    /// `UnknownConflict`, `ConflictAlreadyResolved`, or `Validation` when the
    /// task is not one of the conflict's candidates.
    pub async fn resolve_conflict(
        &self,
        session_id: &str,
        conflict_id: &str,
        winner_task_id: &str,
    ) -> Result<Decision> {
        self.handle(session_id).await?.resolve_conflict(conflict_id, winner_task_id)
    }

    /// Cancels a live session, releasing its agents before returning.
    pub async fn cancel_session(&self, session_id: &str) -> Result<()> {
        self.handle(session_id).await?.cancel().await
    }

    /// Drops a finished session.
    ///
    /// # Errors
    /// `SessionActive` if the session has not reached a terminal status.
    pub async fn purge_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| OrchestrationError::UnknownSession(session_id.to_string()))?;
        if !handle.status().is_terminal() {
            return Err(OrchestrationError::SessionActive(session_id.to_string()));
        }
        sessions.remove(session_id);
        debug!(session_id = %session_id, "Session purged");
        Ok(())
    }

    /// Every conflict of every retained session, by detection time.
    pub async fn conflict_history(&self) -> Vec<Conflict> {
        let mut conflicts: Vec<Conflict> = self
            .sessions
            .read()
            .await
            .values()
            .flat_map(|h| h.snapshot().conflicts)
            .collect();
        conflicts.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then_with(|| a.id.cmp(&b.id)));
        conflicts
    }

    /// Assigns a task straight to one agent, outside any session.
    ///
    /// The agent is reserved before this returns; the task then runs in the
    /// background with the usual retry budget.
    ///
    /// # Errors
    /// `UnknownAgent`, `AgentBusy` or `AgentUnavailable`.
    pub async fn assign_task(&self, request: DirectTaskRequest) -> Result<DirectTaskReceipt> {
        if request.title.trim().is_empty() {
            return Err(OrchestrationError::Validation("title must not be empty".to_string()));
        }
        let reservation = self.registry.reserve(&request.agent_id).await?;
        let agent = reservation.agent().clone();
        let description = if request.description.trim().is_empty() {
            request.title.clone()
        } else {
            format!("{}: {}", request.title, request.description)
        };
        let task = Task::new(None, agent.id.clone(), description, request.priority);
        let task_id = task.id.clone();
        let task_request = TaskRequest {
            task_id: task_id.clone(),
            session_id: None,
            mode: None,
            round: 1,
            attempt: 0,
            description: task.description.clone(),
            required_capabilities: std::collections::BTreeSet::new(),
            quality_threshold: 0.0,
            priority: task.priority,
            planning: false,
            context: SessionOutput::default(),
        };

        let (done, _) = watch::channel(false);
        let handle = Arc::new(DirectTaskHandle { task: Mutex::new(task), done });
        self.direct_tasks.write().await.insert(task_id.clone(), Arc::clone(&handle));
        info!(task_id = %task_id, agent_id = %agent.id, "Direct task assigned");

        let runner = self.runner.clone();
        let metrics = Arc::clone(&self.metrics);
        let receipt = DirectTaskReceipt { task_id: task_id.clone() };
        tokio::spawn(async move {
            let outcome = runner
                .run(&agent, task_request, false, |attempt| {
                    let mut task = handle.lock();
                    task.status = TaskStatus::Dispatched;
                    task.attempts = attempt;
                })
                .await;
            drop(reservation);

            let (status, attempts) = {
                let mut task = handle.lock();
                match outcome {
                    Ok(output) => {
                        task.result = Some(output);
                        task.finish(TaskStatus::Succeeded);
                    }
                    Err(err) => {
                        warn!(task_id = %task.id, error = %err, "Direct task failed");
                        task.error = Some(err.to_string());
                        task.finish(TaskStatus::Failed);
                    }
                }
                (task.status, task.attempts)
            };
            metrics.task_finished(None, &task_id, &agent.id, status, attempts);
            handle.done.send_replace(true);
        });

        Ok(receipt)
    }

    async fn direct_handle(&self, task_id: &str) -> Result<Arc<DirectTaskHandle>> {
        self.direct_tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::UnknownTask(task_id.to_string()))
    }

    /// Current record of a direct task.
    pub async fn direct_task(&self, task_id: &str) -> Result<Task> {
        Ok(self.direct_handle(task_id).await?.lock().clone())
    }

    /// Waits for a direct task to finish and returns its record.
    pub async fn wait_for_task(&self, task_id: &str) -> Result<Task> {
        let handle = self.direct_handle(task_id).await?;
        let mut done = handle.done.subscribe();
        if done.wait_for(|finished| *finished).await.is_err() {
            warn!(task_id = %task_id, "Direct task channel closed");
        }
        Ok(handle.lock().clone())
    }

    /// Drops a finished direct task from the store.
    ///
    /// # Errors
    /// `UnknownTask`, or `TaskActive` while the task is still running.
    pub async fn purge_task(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.direct_tasks.write().await;
        let handle =
            tasks.get(task_id).ok_or_else(|| OrchestrationError::UnknownTask(task_id.to_string()))?;
        if !handle.lock().status.is_terminal() {
            return Err(OrchestrationError::TaskActive(task_id.to_string()));
        }
        tasks.remove(task_id);
        debug!(task_id = %task_id, "Direct task purged");
        Ok(())
    }

    /// Current metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Subscribes to session, task and conflict events.
    pub fn subscribe_metrics(&self) -> broadcast::Receiver<MetricsEvent> {
        self.metrics.subscribe()
    }
}
