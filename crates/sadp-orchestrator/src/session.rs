//! Collaboration session driver.
//!
//! A session is one spawned task that walks the lifecycle in
//! [`crate::lifecycle`]: plan, dispatch rounds of tasks, settle the round's
//! conflicts, fold the accepted results into the aggregate output. The record
//! behind a [`SessionHandle`] is the single source of truth that snapshots,
//! external conflict resolution and cancellation all go through.

use crate::config::OrchestratorSettings;
use crate::conflict::{Conflict, ConflictKind, ConflictResolver, Decision, Resolution, RoundResult};
use crate::distributor::{DistributionPlan, RoundCompletionPolicy, RoundOutcome, TaskDistributor};
use crate::error::{OrchestrationError, Result};
use crate::executor::{AgentExecutor, PlanStep, SessionOutput, TaskOutput, TaskRequest, WorkResult};
use crate::lifecycle::SessionStatus;
use crate::metrics::MetricsCollector;
use crate::registry::AgentRegistry;
use crate::types::{Agent, AgentId, CollaborationMode, CollaborationRequest, Task, TaskStatus};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    /// Stable error code, e.g. `convergence_timeout`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&OrchestrationError> for SessionFailure {
    fn from(err: &OrchestrationError) -> Self {
        Self { code: err.code().to_string(), message: err.to_string() }
    }
}

/// Returned when a session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReceipt {
    /// New session ID.
    pub session_id: String,
    /// Always `created`.
    pub status: SessionStatus,
}

/// Listing entry for a retained session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session ID.
    pub id: String,
    /// Title.
    pub title: String,
    /// Mode.
    pub mode: CollaborationMode,
    /// Current status.
    pub status: SessionStatus,
    /// Participant agent IDs.
    pub participants: Vec<AgentId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Full state of one collaboration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationSession {
    /// Session ID.
    pub id: String,
    /// The request the session was created from.
    pub request: CollaborationRequest,
    /// Current status.
    pub status: SessionStatus,
    /// Latest dispatch round.
    pub round: u32,
    /// Every task, in creation order.
    pub tasks: Vec<Task>,
    /// Every detected conflict, in detection order.
    pub conflicts: Vec<Conflict>,
    /// Validated autonomous dispatch plan.
    pub plan: Option<crate::executor::DispatchPlan>,
    /// Accepted aggregate output.
    pub output: SessionOutput,
    /// Set when the session failed.
    pub failure: Option<SessionFailure>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
    /// Time the session reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl CollaborationSession {
    /// Creates a session record in `created`.
    #[must_use]
    pub fn new(request: CollaborationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: format!("session-{}", uuid::Uuid::new_v4()),
            request,
            status: SessionStatus::Created,
            round: 0,
            tasks: Vec::new(),
            conflicts: Vec::new(),
            plan: None,
            output: SessionOutput::default(),
            failure: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Agents of the work tasks, in dispatch order.
    #[must_use]
    pub fn dispatch_order(&self) -> Vec<&str> {
        self.tasks.iter().filter(|t| !t.planning).map(|t| t.agent_id.as_str()).collect()
    }

    /// Conflicts waiting for the external caller.
    pub fn escalated_conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| c.is_escalated())
    }

    /// Looks up a task.
    #[must_use]
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Listing entry.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.request.title.clone(),
            mode: self.request.mode,
            status: self.status,
            participants: self.request.participants.clone(),
            created_at: self.created_at,
        }
    }

    /// Folds one round's successful results into the aggregate output.
    ///
    /// A contested key only takes the winning task's value; an uncontested
    /// key takes the latest value.
    pub fn accept_round(&mut self, round: u32, results: &[AcceptedResult]) {
        let winners: HashMap<(ConflictKind, String), String> = self
            .conflicts
            .iter()
            .filter(|c| c.round == round)
            .filter_map(|c| c.decision().map(|d| ((c.kind, c.key.clone()), d.task_id.clone())))
            .collect();
        let accepts = |kind: ConflictKind, key: &str, task_id: &str| {
            winners.get(&(kind, key.to_string())).is_none_or(|winner| winner == task_id)
        };

        for result in results {
            for (key, value) in &result.work.artifacts {
                if accepts(ConflictKind::ContradictoryOutput, key, &result.task_id) {
                    self.output.artifacts.insert(key.clone(), value.clone());
                }
            }
            for resource in &result.work.claims {
                if accepts(ConflictKind::ResourceContention, resource, &result.task_id) {
                    self.output.claims.insert(resource.clone(), result.agent_id.clone());
                }
            }
            for (item, priority) in &result.work.priorities {
                if accepts(ConflictKind::PriorityClash, item, &result.task_id) {
                    self.output.priorities.insert(item.clone(), *priority);
                }
            }
        }
    }
}

/// A successful work result of a round.
#[derive(Debug, Clone)]
pub struct AcceptedResult {
    /// Producing task.
    pub task_id: String,
    /// Producing agent.
    pub agent_id: AgentId,
    /// Agent precedence.
    pub precedence: u32,
    /// The work.
    pub work: WorkResult,
}

/// Shared, lock-protected session state.
pub(crate) struct SessionHandle {
    id: String,
    record: Mutex<CollaborationSession>,
    status_tx: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
    started: Instant,
    metrics: Arc<MetricsCollector>,
}

impl SessionHandle {
    pub(crate) fn new(request: CollaborationRequest, metrics: Arc<MetricsCollector>) -> Arc<Self> {
        let record = CollaborationSession::new(request);
        let (status_tx, _) = watch::channel(record.status);
        metrics.session_created(&record.id, &record.request.participants);
        Arc::new(Self {
            id: record.id.clone(),
            record: Mutex::new(record),
            status_tx,
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
            started: Instant::now(),
            metrics,
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, CollaborationSession> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> CollaborationSession {
        self.lock().clone()
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.lock().status
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Applies a lifecycle transition, returning the previous status.
    ///
    /// Entering a terminal status cancels every task that has not finished.
    pub(crate) fn transition(
        &self,
        to: SessionStatus,
        failure: Option<SessionFailure>,
    ) -> Result<SessionStatus> {
        let mut cancelled = Vec::new();
        let from = {
            let mut record = self.lock();
            let from = record.status;
            if !from.can_transition_to(to) {
                return Err(OrchestrationError::InvalidTransition { from, to });
            }
            let now = Utc::now();
            record.status = to;
            record.updated_at = now;
            if to.is_terminal() {
                record.completed_at = Some(now);
                record.failure = failure;
                for task in record.tasks.iter_mut().filter(|t| !t.status.is_terminal()) {
                    task.finish(TaskStatus::Cancelled);
                    cancelled.push((task.id.clone(), task.agent_id.clone(), task.attempts));
                }
            }
            from
        };

        debug!(session_id = %self.id, from = %from, to = %to, "Session transition");
        for (task_id, agent_id, attempts) in cancelled {
            self.metrics.task_finished(
                Some(&self.id),
                &task_id,
                &agent_id,
                TaskStatus::Cancelled,
                attempts,
            );
        }
        self.metrics.session_transition(&self.id, from, to, self.started.elapsed());
        // Waiters must observe metrics already updated.
        self.status_tx.send_replace(to);
        Ok(from)
    }

    /// Cancels the session and stops its driver.
    pub(crate) async fn cancel(&self) -> Result<()> {
        self.transition(SessionStatus::Cancelled, None).map_err(|err| match err {
            OrchestrationError::InvalidTransition { .. } => {
                OrchestrationError::SessionTerminal(self.id.clone())
            }
            other => other,
        })?;
        self.cancel.cancel();
        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(driver) = driver {
            if let Err(err) = driver.await {
                warn!(session_id = %self.id, error = %err, "Session driver ended abnormally");
            }
        }
        info!(session_id = %self.id, "Collaboration session cancelled");
        Ok(())
    }

    /// Records an external decision for an escalated conflict.
    ///
    /// Once no escalated conflict remains the session resumes.
    pub(crate) fn resolve_conflict(&self, conflict_id: &str, winner_task_id: &str) -> Result<Decision> {
        let (decision, elapsed, still_open) = {
            let mut record = self.lock();
            if record.status != SessionStatus::ResolvingConflict {
                return Err(OrchestrationError::SessionNotBlocked(self.id.clone()));
            }
            let conflict = record.conflicts.iter_mut().find(|c| c.id == conflict_id).ok_or_else(
                || OrchestrationError::UnknownConflict {
                    session_id: self.id.clone(),
                    conflict_id: conflict_id.to_string(),
                },
            )?;
            let decision = conflict.resolve_externally(winner_task_id)?;
            let elapsed = conflict.resolution_time().unwrap_or_default();
            (decision, elapsed, record.escalated_conflicts().count())
        };

        info!(
            session_id = %self.id,
            conflict_id = %conflict_id,
            winner = %decision.agent_id,
            remaining = still_open,
            "Conflict resolved externally"
        );
        self.metrics.conflict_resolved(&self.id, conflict_id, decision.method, elapsed);
        if still_open == 0 {
            if let Err(err) = self.transition(SessionStatus::InProgress, None) {
                debug!(session_id = %self.id, error = %err, "Session not resumed");
            }
        }
        Ok(decision)
    }

    fn set_round(&self, round: u32) -> SessionOutput {
        let mut record = self.lock();
        record.round = round;
        record.output.clone()
    }

    fn task_count(&self) -> usize {
        self.lock().tasks.len()
    }

    fn add_task(&self, task: Task) {
        self.lock().tasks.push(task);
    }

    fn set_plan(&self, plan: crate::executor::DispatchPlan) {
        self.lock().plan = Some(plan);
    }

    /// Returns true when these are the session's first conflicts.
    fn add_conflicts(&self, conflicts: Vec<Conflict>) -> bool {
        let mut record = self.lock();
        let first = record.conflicts.is_empty() && !conflicts.is_empty();
        record.conflicts.extend(conflicts);
        first
    }

    fn accept_round(&self, round: u32, results: &[AcceptedResult]) {
        self.lock().accept_round(round, results);
    }

    /// Applies `update` unless the session already finished.
    fn update_task(&self, task_id: &str, update: impl FnOnce(&mut Task)) -> Option<Task> {
        let mut record = self.lock();
        if record.status.is_terminal() {
            return None;
        }
        let task = record.tasks.iter_mut().find(|t| t.id == task_id)?;
        update(task);
        Some(task.clone())
    }

    fn mark_dispatched(&self, task_id: &str, attempt: u32) {
        self.update_task(task_id, |task| {
            task.status = TaskStatus::Dispatched;
            task.attempts = attempt;
        });
    }

    fn finish_task(&self, task_id: &str, outcome: &Result<TaskOutput>) {
        let finished = self.update_task(task_id, |task| match outcome {
            Ok(output) => {
                task.result = Some(output.clone());
                task.finish(TaskStatus::Succeeded);
            }
            Err(err) => {
                task.error = Some(err.to_string());
                task.finish(TaskStatus::Failed);
            }
        });
        if let Some(task) = finished {
            self.metrics.task_finished(
                Some(&self.id),
                &task.id,
                &task.agent_id,
                task.status,
                task.attempts,
            );
        }
    }
}

/// Runs one task attempt after another until it succeeds or the retry
/// budget runs out.
#[derive(Clone)]
pub(crate) struct TaskRunner {
    executor: Arc<dyn AgentExecutor>,
    registry: Arc<AgentRegistry>,
    settings: OrchestratorSettings,
}

impl TaskRunner {
    pub(crate) fn new(
        executor: Arc<dyn AgentExecutor>,
        registry: Arc<AgentRegistry>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { executor, registry, settings }
    }

    async fn attempt(&self, agent: &Agent, request: &TaskRequest, reserve: bool) -> Result<TaskOutput> {
        let _reservation = if reserve {
            Some(
                self.registry
                    .reserve_within(
                        &agent.id,
                        self.settings.reservation_timeout(),
                        self.settings.reservation_poll_interval(),
                    )
                    .await?,
            )
        } else {
            None
        };

        let output = tokio::time::timeout(
            self.settings.task_timeout(),
            self.executor.execute(agent, request),
        )
        .await
        .map_err(|_| OrchestrationError::TaskTimeout(self.settings.task_timeout_ms))??;

        if !request.planning && matches!(output, TaskOutput::Plan(_)) {
            return Err(OrchestrationError::Execution(
                "agent returned a dispatch plan for a work task".to_string(),
            ));
        }
        Ok(output)
    }

    /// Runs a task with retries.
    ///
    /// With `reserve` set every attempt reserves the agent first; otherwise the
    /// caller already holds the reservation. `on_attempt` sees each attempt
    /// number before it starts.
    pub(crate) async fn run(
        &self,
        agent: &Agent,
        mut request: TaskRequest,
        reserve: bool,
        mut on_attempt: impl FnMut(u32) + Send,
    ) -> Result<TaskOutput> {
        let max_attempts = self.settings.max_task_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            request.attempt = attempt;
            on_attempt(attempt);
            match self.attempt(agent, &request, reserve).await {
                Ok(output) => {
                    debug!(task_id = %request.task_id, agent_id = %agent.id, attempt, "Task succeeded");
                    return Ok(output);
                }
                Err(
                    err @ (OrchestrationError::AgentUnavailable(_)
                    | OrchestrationError::UnknownAgent(_)),
                ) => return Err(err),
                Err(err) => {
                    warn!(
                        task_id = %request.task_id,
                        agent_id = %agent.id,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Task attempt failed"
                    );
                    last_error = err.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(self.settings.retry_backoff()).await;
                    }
                }
            }
        }

        Err(OrchestrationError::TaskFailed {
            task_id: request.task_id,
            agent_id: agent.id.clone(),
            attempts: max_attempts,
            reason: last_error,
        })
    }
}

/// Collaborators a session driver needs.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) metrics: Arc<MetricsCollector>,
    pub(crate) resolver: Arc<ConflictResolver>,
    pub(crate) distributor: Arc<TaskDistributor>,
    pub(crate) policy: Arc<dyn RoundCompletionPolicy>,
    pub(crate) runner: TaskRunner,
}

struct Assignment {
    agent: Agent,
    description: String,
    capabilities: BTreeSet<String>,
}

impl Assignment {
    fn new(agent: Agent, description: &str) -> Self {
        Self { agent, description: description.to_string(), capabilities: BTreeSet::new() }
    }
}

struct RoundReport {
    results: Vec<AcceptedResult>,
    conflicts_detected: usize,
    conflicts_escalated: usize,
}

/// Drives one session from `created` to a terminal status.
pub(crate) struct SessionDriver {
    handle: Arc<SessionHandle>,
    context: SessionContext,
    request: CollaborationRequest,
}

async fn sleep_for(deadline: Option<Duration>) {
    match deadline {
        Some(remaining) => tokio::time::sleep(remaining).await,
        None => std::future::pending().await,
    }
}

impl SessionDriver {
    /// Spawns the driver for a freshly created session.
    pub(crate) fn spawn(handle: &Arc<SessionHandle>, context: SessionContext) {
        let request = handle.snapshot().request;
        let driver = Self { handle: Arc::clone(handle), context, request };
        let join = tokio::spawn(driver.run());
        *handle.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(join);
    }

    async fn run(self) {
        let session_id = self.handle.id().to_string();
        let cancel = self.handle.cancel.clone();
        let deadline =
            self.request.deadline.map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO));

        info!(
            session_id = %session_id,
            mode = %self.request.mode,
            participants = ?self.request.participants,
            "Collaboration session started"
        );

        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(OrchestrationError::Cancelled),
            () = sleep_for(deadline) => Err(OrchestrationError::DeadlineExceeded),
            result = self.drive() => result,
        };

        match outcome {
            Ok(()) => match self.handle.transition(SessionStatus::Completed, None) {
                Ok(_) => info!(session_id = %session_id, "Collaboration session completed"),
                Err(err) => debug!(session_id = %session_id, error = %err, "Completion skipped"),
            },
            Err(OrchestrationError::Cancelled) => {
                debug!(session_id = %session_id, "Session driver stopped");
            }
            Err(err) => self.fail(&err),
        }
    }

    fn fail(&self, err: &OrchestrationError) {
        match self.handle.transition(SessionStatus::Failed, Some(SessionFailure::from(err))) {
            Ok(from) => error!(
                session_id = %self.handle.id(),
                from = %from,
                code = err.code(),
                error = %err,
                "Collaboration session failed"
            ),
            Err(skipped) => debug!(
                session_id = %self.handle.id(),
                error = %skipped,
                "Failure not recorded, session already finished"
            ),
        }
    }

    async fn drive(&self) -> Result<()> {
        self.handle.transition(SessionStatus::Planning, None)?;
        let plan = self.context.distributor.plan(&self.context.registry, &self.request).await?;
        let description = self.request.description.as_str();

        match plan {
            DistributionPlan::Sequential(agents) => {
                self.handle.transition(SessionStatus::InProgress, None)?;
                for (index, agent) in agents.into_iter().enumerate() {
                    let round = index as u32 + 1;
                    self.run_round(round, vec![Assignment::new(agent, description)]).await?;
                }
            }
            DistributionPlan::Parallel(agents) => {
                self.handle.transition(SessionStatus::InProgress, None)?;
                let assignments =
                    agents.into_iter().map(|agent| Assignment::new(agent, description)).collect();
                self.run_round(1, assignments).await?;
            }
            DistributionPlan::Interactive { participants, max_rounds } => {
                self.handle.transition(SessionStatus::InProgress, None)?;
                for round in 1..=max_rounds {
                    let assignments = participants
                        .iter()
                        .map(|agent| Assignment::new(agent.clone(), description))
                        .collect();
                    let report = self.run_round(round, assignments).await?;
                    let outcome = RoundOutcome {
                        round,
                        max_rounds,
                        quality_threshold: self.request.requirements.quality_threshold,
                        quality_scores: report
                            .results
                            .iter()
                            .map(|r| (r.agent_id.clone(), r.work.quality_score))
                            .collect(),
                        conflicts_detected: report.conflicts_detected,
                        conflicts_escalated: report.conflicts_escalated,
                    };
                    if self.context.policy.is_complete(&outcome) {
                        debug!(session_id = %self.handle.id(), round, "Interactive session converged");
                        return Ok(());
                    }
                    debug!(session_id = %self.handle.id(), round, "Round incomplete");
                }
                return Err(OrchestrationError::ConvergenceTimeout { rounds: max_rounds });
            }
            DistributionPlan::Autonomous { planner, participants } => {
                let stages = self.plan_autonomously(&planner, &participants).await?;
                self.handle.transition(SessionStatus::InProgress, None)?;
                for (index, stage) in stages.into_iter().enumerate() {
                    let round = index as u32 + 2;
                    let assignments = stage
                        .into_iter()
                        .map(|step| Self::assignment_for(step, &participants, description))
                        .collect::<Result<Vec<_>>>()?;
                    self.run_round(round, assignments).await?;
                }
            }
        }
        Ok(())
    }

    fn assignment_for(step: PlanStep, participants: &[Agent], fallback: &str) -> Result<Assignment> {
        let agent = participants.iter().find(|a| a.id == step.agent_id).cloned().ok_or_else(|| {
            OrchestrationError::InvalidPlan(format!("agent '{}' is not a participant", step.agent_id))
        })?;
        let description =
            if step.description.trim().is_empty() { fallback.to_string() } else { step.description };
        Ok(Assignment { agent, description, capabilities: step.capabilities })
    }

    /// Runs the planner's task and validates the plan it returns.
    async fn plan_autonomously(
        &self,
        planner: &Agent,
        participants: &[Agent],
    ) -> Result<Vec<Vec<PlanStep>>> {
        let context = self.handle.set_round(1);
        let task = self
            .context
            .distributor
            .create_task(
                self.handle.id(),
                &planner.id,
                &self.request.description,
                self.request.priority,
                1,
                self.handle.task_count(),
            )
            .as_planning();
        let request = self.task_request(&task, context, BTreeSet::new());
        self.handle.add_task(task);
        debug!(session_id = %self.handle.id(), planner = %planner.id, "Requesting dispatch plan");

        let TaskOutput::Plan(plan) = self.execute(planner, request).await? else {
            return Err(OrchestrationError::InvalidPlan(format!(
                "planner '{}' returned a work result",
                planner.id
            )));
        };
        let stages =
            self.context.distributor.validate_plan(&self.context.registry, participants, &plan).await?;
        self.handle.set_plan(plan);
        Ok(stages)
    }

    fn task_request(
        &self,
        task: &Task,
        context: SessionOutput,
        capabilities: BTreeSet<String>,
    ) -> TaskRequest {
        let mut required_capabilities = self.request.requirements.capabilities.clone();
        required_capabilities.extend(capabilities);
        TaskRequest {
            task_id: task.id.clone(),
            session_id: Some(self.handle.id().to_string()),
            mode: Some(self.request.mode),
            round: task.round,
            attempt: 0,
            description: task.description.clone(),
            required_capabilities,
            quality_threshold: self.request.requirements.quality_threshold,
            priority: task.priority,
            planning: task.planning,
            context,
        }
    }

    async fn execute(&self, agent: &Agent, request: TaskRequest) -> Result<TaskOutput> {
        let task_id = request.task_id.clone();
        let outcome = self
            .context
            .runner
            .run(agent, request, true, |attempt| self.handle.mark_dispatched(&task_id, attempt))
            .await;
        self.handle.finish_task(&task_id, &outcome);
        outcome
    }

    /// Dispatches one round concurrently and settles it.
    ///
    /// Every task of the round is terminal before this returns, even on failure.
    async fn run_round(&self, round: u32, assignments: Vec<Assignment>) -> Result<RoundReport> {
        let context = self.handle.set_round(round);
        let mut jobs = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let task = self.context.distributor.create_task(
                self.handle.id(),
                &assignment.agent.id,
                &assignment.description,
                self.request.priority,
                round,
                self.handle.task_count(),
            );
            let request = self.task_request(&task, context.clone(), assignment.capabilities);
            self.handle.add_task(task);
            jobs.push((assignment.agent, request));
        }
        debug!(session_id = %self.handle.id(), round, tasks = jobs.len(), "Dispatching round");

        let outcomes =
            join_all(jobs.iter().map(|(agent, request)| self.execute(agent, request.clone()))).await;

        let mut results = Vec::with_capacity(jobs.len());
        let mut first_error = None;
        for ((agent, request), outcome) in jobs.iter().zip(outcomes) {
            match outcome {
                Ok(TaskOutput::Work(work)) => results.push(AcceptedResult {
                    task_id: request.task_id.clone(),
                    agent_id: agent.id.clone(),
                    precedence: agent.precedence,
                    work,
                }),
                Ok(TaskOutput::Plan(_)) => {
                    first_error.get_or_insert(OrchestrationError::Execution(format!(
                        "agent '{}' returned a dispatch plan for a work task",
                        agent.id
                    )));
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let (conflicts_detected, conflicts_escalated) = self.settle_conflicts(round, &results).await?;
        self.handle.accept_round(round, &results);
        Ok(RoundReport { results, conflicts_detected, conflicts_escalated })
    }

    /// Detects and resolves the round's conflicts, blocking in
    /// `resolving_conflict` while any is escalated.
    async fn settle_conflicts(&self, round: u32, results: &[AcceptedResult]) -> Result<(usize, usize)> {
        let session_id = self.handle.id();
        let round_results: Vec<RoundResult<'_>> = results
            .iter()
            .map(|r| RoundResult {
                task_id: &r.task_id,
                agent_id: &r.agent_id,
                precedence: r.precedence,
                work: &r.work,
            })
            .collect();
        let mut conflicts = self.context.resolver.detect(session_id, round, &round_results);
        if conflicts.is_empty() {
            return Ok((0, 0));
        }

        let mut escalated = 0;
        for conflict in &mut conflicts {
            self.context.metrics.conflict_detected(session_id, &conflict.id, conflict.kind);
            self.context.resolver.resolve(conflict);
            match &conflict.resolution {
                Resolution::Resolved(decision) => {
                    self.context.metrics.conflict_resolved(
                        session_id,
                        &conflict.id,
                        decision.method,
                        conflict.resolution_time().unwrap_or_default(),
                    );
                }
                Resolution::Escalated => {
                    escalated += 1;
                    self.context.metrics.conflict_escalated(session_id, &conflict.id);
                }
                Resolution::Pending => {}
            }
        }
        let detected = conflicts.len();
        if self.handle.add_conflicts(conflicts) {
            self.context.metrics.session_conflicted(session_id);
        }

        if escalated > 0 {
            let mut status = self.handle.subscribe();
            self.handle.transition(SessionStatus::ResolvingConflict, None)?;
            warn!(session_id = %session_id, round, escalated, "Awaiting external conflict resolution");
            let resumed =
                status.wait_for(|s| *s != SessionStatus::ResolvingConflict).await.is_ok();
            if !resumed || self.handle.status() != SessionStatus::InProgress {
                return Err(OrchestrationError::Cancelled);
            }
            debug!(session_id = %session_id, round, "Escalated conflicts resolved");
        }
        Ok((detected, escalated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{Candidate, ResolutionMethod};
    use crate::types::Priority;
    use serde_json::json;

    fn request() -> CollaborationRequest {
        CollaborationRequest::new(
            "Platform",
            "Build it",
            CollaborationMode::Parallel,
            ["claude", "cursor_ai"],
        )
    }

    fn accepted(task_id: &str, agent_id: &str, work: WorkResult) -> AcceptedResult {
        AcceptedResult { task_id: task_id.to_string(), agent_id: agent_id.to_string(), precedence: 0, work }
    }

    fn resolved_conflict(round: u32, kind: ConflictKind, key: &str, winner: &str) -> Conflict {
        Conflict {
            id: format!("conflict-{key}"),
            session_id: "s".to_string(),
            round,
            kind,
            key: key.to_string(),
            agents: BTreeSet::new(),
            candidates: Vec::<Candidate>::new(),
            resolution: Resolution::Resolved(Decision {
                task_id: winner.to_string(),
                agent_id: String::new(),
                method: ResolutionMethod::Priority,
            }),
            detected_at: Utc::now(),
            resolved_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_accept_round_excludes_losers() {
        let mut session = CollaborationSession::new(request());
        session.conflicts.push(resolved_conflict(1, ConflictKind::ContradictoryOutput, "api", "t2"));
        session.conflicts.push(resolved_conflict(1, ConflictKind::ResourceContention, "repo", "t1"));

        let results = [
            accepted(
                "t1",
                "claude",
                WorkResult::new("a", 90.0)
                    .with_artifact("api", json!("rest"))
                    .with_artifact("docs", json!("v1"))
                    .with_claim("repo"),
            ),
            accepted(
                "t2",
                "cursor_ai",
                WorkResult::new("b", 80.0)
                    .with_artifact("api", json!("graphql"))
                    .with_claim("repo")
                    .with_priority("login", Priority::High),
            ),
        ];
        session.accept_round(1, &results);

        assert_eq!(session.output.artifacts["api"], json!("graphql"));
        assert_eq!(session.output.artifacts["docs"], json!("v1"));
        assert_eq!(session.output.claims["repo"], "claude");
        assert_eq!(session.output.priorities["login"], Priority::High);
    }

    #[test]
    fn test_later_rounds_override_uncontested_keys() {
        let mut session = CollaborationSession::new(request());
        session.accept_round(1, &[accepted("t1", "claude", WorkResult::new("", 0.0).with_artifact("k", json!(1)))]);
        session.accept_round(2, &[accepted("t2", "claude", WorkResult::new("", 0.0).with_artifact("k", json!(2)))]);
        assert_eq!(session.output.artifacts["k"], json!(2));
    }

    #[test]
    fn test_terminal_transition_cancels_open_tasks() {
        let metrics = Arc::new(MetricsCollector::new());
        let handle = SessionHandle::new(request(), Arc::clone(&metrics));
        handle.add_task(Task::new(Some(handle.id().to_string()), "claude", "x", Priority::Medium));

        handle.transition(SessionStatus::Planning, None).unwrap();
        handle.transition(SessionStatus::Failed, Some(SessionFailure {
            code: "deadline_exceeded".to_string(),
            message: "late".to_string(),
        }))
        .unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.tasks[0].status, TaskStatus::Cancelled);
        assert!(snapshot.completed_at.is_some());
        assert_eq!(snapshot.failure.unwrap().code, "deadline_exceeded");
        assert_eq!(metrics.snapshot().tasks_cancelled, 1);

        let err = handle.transition(SessionStatus::InProgress, None).unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_cancel_terminal_session_fails() {
        let handle = SessionHandle::new(request(), Arc::new(MetricsCollector::new()));
        handle.cancel().await.unwrap();
        assert_eq!(handle.status(), SessionStatus::Cancelled);

        let err = handle.cancel().await.unwrap_err();
        assert!(matches!(err, OrchestrationError::SessionTerminal(_)));
    }

    #[test]
    fn test_resolve_requires_blocked_session() {
        let handle = SessionHandle::new(request(), Arc::new(MetricsCollector::new()));
        let err = handle.resolve_conflict("c1", "t1").unwrap_err();
        assert!(matches!(err, OrchestrationError::SessionNotBlocked(_)));
    }
}
