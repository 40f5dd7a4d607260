//! Metrics collection for collaboration sessions.
//!
//! The collector keeps monotonic counters and running averages and fans every
//! recorded event out over a broadcast channel. Recording never awaits, so a
//! session never blocks on metrics.

use crate::conflict::{ConflictKind, ResolutionMethod};
use crate::lifecycle::SessionStatus;
use crate::types::{AgentId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events published by the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MetricsEvent {
    /// A session was created.
    SessionCreated {
        /// Session ID.
        session_id: String,
        /// Participant agent IDs.
        participants: Vec<AgentId>,
    },
    /// A session changed status.
    SessionTransition {
        /// Session ID.
        session_id: String,
        /// Previous status.
        from: SessionStatus,
        /// New status.
        to: SessionStatus,
    },
    /// A task reached a terminal status.
    TaskFinished {
        /// Owning session, absent for direct tasks.
        session_id: Option<String>,
        /// Task ID.
        task_id: String,
        /// Agent that ran it.
        agent_id: AgentId,
        /// Terminal status.
        status: TaskStatus,
        /// Attempts used.
        attempts: u32,
    },
    /// A conflict was detected.
    ConflictDetected {
        /// Session ID.
        session_id: String,
        /// Conflict ID.
        conflict_id: String,
        /// Conflict kind.
        kind: ConflictKind,
    },
    /// A conflict received its final decision.
    ConflictResolved {
        /// Session ID.
        session_id: String,
        /// Conflict ID.
        conflict_id: String,
        /// How the winner was chosen.
        method: ResolutionMethod,
    },
    /// A conflict was escalated to the caller.
    ConflictEscalated {
        /// Session ID.
        session_id: String,
        /// Conflict ID.
        conflict_id: String,
    },
}

/// Per-agent task statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    /// Tasks that produced a result.
    pub tasks_succeeded: u64,
    /// Tasks that exhausted their retry budget.
    pub tasks_failed: u64,
    /// Tasks abandoned by cancellation or deadline.
    pub tasks_cancelled: u64,
    /// Sessions the agent participated in.
    pub sessions: u64,
    /// Succeeded over succeeded plus failed, as a percentage (0 with no finished tasks).
    pub success_rate: f64,
}

impl AgentStats {
    fn refresh_rate(&mut self) {
        let finished = self.tasks_succeeded + self.tasks_failed;
        self.success_rate = percentage(self.tasks_succeeded, finished, 0.0);
    }
}

/// Point-in-time view of the collected metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Sessions currently in each status.
    pub sessions_by_status: BTreeMap<SessionStatus, u64>,
    /// Sessions ever created.
    pub total_sessions: u64,
    /// Mean wall-clock duration of sessions that reached a terminal status.
    pub mean_session_duration_ms: f64,
    /// Tasks that succeeded.
    pub tasks_succeeded: u64,
    /// Tasks that failed.
    pub tasks_failed: u64,
    /// Tasks that were cancelled.
    pub tasks_cancelled: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Conflicts with a final decision.
    pub conflicts_resolved: u64,
    /// Conflicts escalated to the caller.
    pub conflicts_escalated: u64,
    /// Mean time from detection to final decision, external decisions included.
    pub mean_conflict_resolution_ms: f64,
    /// Percentage of sessions that hit at least one conflict.
    pub conflict_rate: f64,
    /// Resolved over detected, as a percentage (100 when nothing was detected).
    pub resolution_rate: f64,
    /// Per-agent statistics.
    pub agents: BTreeMap<AgentId, AgentStats>,
}

#[derive(Debug, Default)]
struct MetricsState {
    sessions_by_status: BTreeMap<SessionStatus, u64>,
    total_sessions: u64,
    finished_sessions: u64,
    total_duration_ms: u128,
    tasks_succeeded: u64,
    tasks_failed: u64,
    tasks_cancelled: u64,
    conflicts_detected: u64,
    conflicts_resolved: u64,
    conflicts_escalated: u64,
    total_resolution_us: u128,
    conflicted_sessions: u64,
    agents: BTreeMap<AgentId, AgentStats>,
}

#[allow(clippy::cast_precision_loss)]
fn percentage(part: u64, whole: u64, empty: f64) -> f64 {
    if whole == 0 { empty } else { part as f64 / whole as f64 * 100.0 }
}

/// Collects session, task and conflict metrics.
#[derive(Debug)]
pub struct MetricsCollector {
    broadcast_tx: broadcast::Sender<MetricsEvent>,
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { broadcast_tx, state: Mutex::new(MetricsState::default()) }
    }

    /// Subscribes to metrics events.
    pub fn subscribe(&self) -> broadcast::Receiver<MetricsEvent> {
        self.broadcast_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: MetricsEvent) {
        debug!(?event, "Metrics event");
        // No subscribers is fine.
        let _ = self.broadcast_tx.send(event);
    }

    /// Records a newly created session.
    pub fn session_created(&self, session_id: &str, participants: &[AgentId]) {
        {
            let mut state = self.lock();
            state.total_sessions += 1;
            *state.sessions_by_status.entry(SessionStatus::Created).or_default() += 1;
            for agent_id in participants {
                state.agents.entry(agent_id.clone()).or_default().sessions += 1;
            }
        }
        self.publish(MetricsEvent::SessionCreated {
            session_id: session_id.to_string(),
            participants: participants.to_vec(),
        });
    }

    /// Records a status transition. `elapsed` is the session's age and is
    /// folded into the mean duration when `to` is terminal.
    pub fn session_transition(
        &self,
        session_id: &str,
        from: SessionStatus,
        to: SessionStatus,
        elapsed: Duration,
    ) {
        {
            let mut state = self.lock();
            if let Some(count) = state.sessions_by_status.get_mut(&from) {
                *count = count.saturating_sub(1);
            }
            *state.sessions_by_status.entry(to).or_default() += 1;
            if to.is_terminal() {
                state.finished_sessions += 1;
                state.total_duration_ms += elapsed.as_millis();
            }
        }
        self.publish(MetricsEvent::SessionTransition {
            session_id: session_id.to_string(),
            from,
            to,
        });
    }

    /// Records a task reaching a terminal status.
    pub fn task_finished(
        &self,
        session_id: Option<&str>,
        task_id: &str,
        agent_id: &str,
        status: TaskStatus,
        attempts: u32,
    ) {
        {
            let mut state = self.lock();
            match status {
                TaskStatus::Succeeded => state.tasks_succeeded += 1,
                TaskStatus::Failed => state.tasks_failed += 1,
                TaskStatus::Cancelled => state.tasks_cancelled += 1,
                TaskStatus::Pending | TaskStatus::Dispatched => return,
            }
            let stats = state.agents.entry(agent_id.to_string()).or_default();
            match status {
                TaskStatus::Succeeded => stats.tasks_succeeded += 1,
                TaskStatus::Failed => stats.tasks_failed += 1,
                _ => stats.tasks_cancelled += 1,
            }
            stats.refresh_rate();
        }
        self.publish(MetricsEvent::TaskFinished {
            session_id: session_id.map(str::to_string),
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            status,
            attempts,
        });
    }

    /// Records a detected conflict.
    pub fn conflict_detected(&self, session_id: &str, conflict_id: &str, kind: ConflictKind) {
        {
            let mut state = self.lock();
            state.conflicts_detected += 1;
        }
        self.publish(MetricsEvent::ConflictDetected {
            session_id: session_id.to_string(),
            conflict_id: conflict_id.to_string(),
            kind,
        });
    }

    /// Counts a session that hit its first conflict.
    pub fn session_conflicted(&self, session_id: &str) {
        self.lock().conflicted_sessions += 1;
        debug!(session_id = %session_id, "Session hit its first conflict");
    }

    /// Records a conflict's final decision, `elapsed` after its detection.
    pub fn conflict_resolved(
        &self,
        session_id: &str,
        conflict_id: &str,
        method: ResolutionMethod,
        elapsed: Duration,
    ) {
        {
            let mut state = self.lock();
            state.conflicts_resolved += 1;
            state.total_resolution_us += elapsed.as_micros();
        }
        self.publish(MetricsEvent::ConflictResolved {
            session_id: session_id.to_string(),
            conflict_id: conflict_id.to_string(),
            method,
        });
    }

    /// Records an escalation.
    pub fn conflict_escalated(&self, session_id: &str, conflict_id: &str) {
        self.lock().conflicts_escalated += 1;
        self.publish(MetricsEvent::ConflictEscalated {
            session_id: session_id.to_string(),
            conflict_id: conflict_id.to_string(),
        });
    }

    /// Current metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        let mut sessions_by_status: BTreeMap<SessionStatus, u64> =
            SessionStatus::ALL.iter().map(|status| (*status, 0)).collect();
        sessions_by_status.extend(state.sessions_by_status.iter().map(|(k, v)| (*k, *v)));

        #[allow(clippy::cast_precision_loss)]
        let mean_session_duration_ms = if state.finished_sessions == 0 {
            0.0
        } else {
            state.total_duration_ms as f64 / state.finished_sessions as f64
        };
        #[allow(clippy::cast_precision_loss)]
        let mean_conflict_resolution_ms = if state.conflicts_resolved == 0 {
            0.0
        } else {
            state.total_resolution_us as f64 / state.conflicts_resolved as f64 / 1000.0
        };

        MetricsSnapshot {
            sessions_by_status,
            total_sessions: state.total_sessions,
            mean_session_duration_ms,
            tasks_succeeded: state.tasks_succeeded,
            tasks_failed: state.tasks_failed,
            tasks_cancelled: state.tasks_cancelled,
            conflicts_detected: state.conflicts_detected,
            conflicts_resolved: state.conflicts_resolved,
            conflicts_escalated: state.conflicts_escalated,
            mean_conflict_resolution_ms,
            conflict_rate: percentage(state.conflicted_sessions, state.total_sessions, 0.0),
            resolution_rate: percentage(state.conflicts_resolved, state.conflicts_detected, 100.0),
            agents: state.agents.clone(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let snapshot = MetricsCollector::new().snapshot();
        assert_eq!(snapshot.total_sessions, 0);
        assert_eq!(snapshot.sessions_by_status.len(), SessionStatus::ALL.len());
        assert!((snapshot.resolution_rate - 100.0).abs() < f64::EPSILON);
        assert!(snapshot.conflict_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn test_session_counts_follow_transitions() {
        let metrics = MetricsCollector::new();
        metrics.session_created("s1", &["claude".to_string(), "cursor_ai".to_string()]);
        metrics.session_transition("s1", SessionStatus::Created, SessionStatus::Planning, Duration::ZERO);
        metrics.session_transition("s1", SessionStatus::Planning, SessionStatus::InProgress, Duration::ZERO);
        metrics.session_transition(
            "s1",
            SessionStatus::InProgress,
            SessionStatus::Completed,
            Duration::from_millis(40),
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_by_status[&SessionStatus::Completed], 1);
        assert_eq!(snapshot.sessions_by_status[&SessionStatus::Created], 0);
        assert_eq!(snapshot.sessions_by_status[&SessionStatus::InProgress], 0);
        assert!((snapshot.mean_session_duration_ms - 40.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.agents["claude"].sessions, 1);
    }

    #[test]
    fn test_task_success_rate() {
        let metrics = MetricsCollector::new();
        metrics.task_finished(Some("s1"), "t1", "claude", TaskStatus::Succeeded, 1);
        metrics.task_finished(Some("s1"), "t2", "claude", TaskStatus::Succeeded, 2);
        metrics.task_finished(Some("s1"), "t3", "claude", TaskStatus::Failed, 3);
        metrics.task_finished(None, "t4", "claude", TaskStatus::Cancelled, 1);

        let stats = &metrics.snapshot().agents["claude"];
        assert_eq!(stats.tasks_succeeded, 2);
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.tasks_cancelled, 1);
        assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_conflict_rates() {
        let metrics = MetricsCollector::new();
        metrics.session_created("s1", &[]);
        metrics.session_created("s2", &[]);
        metrics.session_conflicted("s1");
        metrics.conflict_detected("s1", "c1", ConflictKind::ContradictoryOutput);
        metrics.conflict_detected("s1", "c2", ConflictKind::PriorityClash);
        metrics.conflict_resolved("s1", "c1", ResolutionMethod::Quality, Duration::from_millis(2));
        metrics.conflict_escalated("s1", "c2");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.conflicts_detected, 2);
        assert_eq!(snapshot.conflicts_escalated, 1);
        assert!((snapshot.conflict_rate - 50.0).abs() < f64::EPSILON);
        assert!((snapshot.resolution_rate - 50.0).abs() < f64::EPSILON);
        assert!((snapshot.mean_conflict_resolution_ms - 2.0).abs() < 1e-9);

        metrics.conflict_resolved("s1", "c2", ResolutionMethod::External, Duration::from_millis(10));
        let snapshot = metrics.snapshot();
        assert!((snapshot.resolution_rate - 100.0).abs() < f64::EPSILON);
        assert!((snapshot.mean_conflict_resolution_ms - 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let metrics = MetricsCollector::new();
        let mut rx = metrics.subscribe();

        metrics.task_finished(Some("s1"), "t1", "figma_ai", TaskStatus::Succeeded, 1);
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            MetricsEvent::TaskFinished { agent_id, status: TaskStatus::Succeeded, .. } if agent_id == "figma_ai"
        ));
    }
}
