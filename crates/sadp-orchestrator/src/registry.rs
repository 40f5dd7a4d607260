//! Agent registry for tracking collaborators and their availability.
//!
//! Registration happens at start-up from static configuration. After that the
//! only mutation is reservation: each agent has its own lock, so sessions that
//! use disjoint agents never contend with each other.

use crate::error::{OrchestrationError, Result};
use crate::types::{Agent, AgentId, AgentStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Point-in-time view of a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    /// The agent's unique ID.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// Capability tags.
    pub capabilities: BTreeSet<String>,
    /// Tie-break precedence.
    pub precedence: u32,
    /// Current status.
    pub status: AgentStatus,
}

#[derive(Debug)]
struct SlotState {
    status: AgentStatus,
    /// Bumped on every successful reservation so a stale guard cannot
    /// release somebody else's reservation.
    generation: u64,
}

#[derive(Debug)]
struct AgentSlot {
    agent: Agent,
    state: Mutex<SlotState>,
}

impl AgentSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_reserve(&self) -> Result<u64> {
        let mut state = self.lock();
        match state.status {
            AgentStatus::Idle => {
                state.status = AgentStatus::Busy;
                state.generation += 1;
                Ok(state.generation)
            }
            AgentStatus::Busy => Err(OrchestrationError::AgentBusy(self.agent.id.clone())),
            AgentStatus::Unavailable => {
                Err(OrchestrationError::AgentUnavailable(self.agent.id.clone()))
            }
        }
    }

    fn release(&self, generation: Option<u64>) -> bool {
        let mut state = self.lock();
        let owns = generation.is_none_or(|g| g == state.generation);
        if state.status == AgentStatus::Busy && owns {
            state.status = AgentStatus::Idle;
            return true;
        }
        false
    }
}

/// Exclusive hold on an agent. The agent returns to idle when this is dropped.
pub struct Reservation {
    slot: Arc<AgentSlot>,
    generation: u64,
}

impl Reservation {
    /// The reserved agent.
    #[must_use]
    pub fn agent(&self) -> &Agent {
        &self.slot.agent
    }

    /// Releases the reservation now.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("agent_id", &self.slot.agent.id)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.slot.release(Some(self.generation)) {
            debug!(agent_id = %self.slot.agent.id, "Reservation released");
        }
    }
}

/// Registry of collaborating agents.
pub struct AgentRegistry {
    /// Map of agent ID to its slot. The map lock only guards membership.
    agents: Arc<RwLock<HashMap<AgentId, Arc<AgentSlot>>>>,
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agent_count", &self.agents.try_read().map(|a| a.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl AgentRegistry {
    /// Creates a new empty agent registry.
    #[must_use]
    pub fn new() -> Self {
        Self { agents: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Registers an agent.
    ///
    /// # Errors
    /// Returns `DuplicateAgent` if the ID is already registered.
    pub async fn register(&self, agent: Agent) -> Result<()> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent.id) {
            warn!(agent_id = %agent.id, "Rejected duplicate agent registration");
            return Err(OrchestrationError::DuplicateAgent(agent.id));
        }

        debug!(agent_id = %agent.id, capabilities = ?agent.capabilities, "Registering agent");
        let slot = AgentSlot {
            agent: agent.clone(),
            state: Mutex::new(SlotState { status: AgentStatus::Idle, generation: 0 }),
        };
        agents.insert(agent.id, Arc::new(slot));
        Ok(())
    }

    async fn slot(&self, id: &str) -> Result<Arc<AgentSlot>> {
        let agents = self.agents.read().await;
        agents.get(id).cloned().ok_or_else(|| OrchestrationError::UnknownAgent(id.to_string()))
    }

    /// Looks up an agent by ID.
    ///
    /// # Errors
    /// Returns `UnknownAgent` if absent.
    pub async fn lookup(&self, id: &str) -> Result<Agent> {
        Ok(self.slot(id).await?.agent.clone())
    }

    /// Current status of an agent.
    pub async fn status(&self, id: &str) -> Result<AgentStatus> {
        Ok(self.slot(id).await?.lock().status)
    }

    /// Atomically moves an agent from idle to busy.
    ///
    /// # Errors
    /// Returns `AgentBusy` if the agent is reserved elsewhere, `AgentUnavailable`
    /// if it is out of rotation, `UnknownAgent` if absent.
    pub async fn reserve(&self, id: &str) -> Result<Reservation> {
        let slot = self.slot(id).await?;
        let generation = slot.try_reserve()?;
        debug!(agent_id = %id, generation, "Agent reserved");
        Ok(Reservation { slot, generation })
    }

    /// Reserves an agent, polling while it is busy until `timeout` elapses.
    ///
    /// Only `AgentBusy` is waited on; any other failure returns immediately.
    pub async fn reserve_within(
        &self,
        id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Reservation> {
        let slot = self.slot(id).await?;
        let deadline = Instant::now() + timeout;

        loop {
            match slot.try_reserve() {
                Ok(generation) => {
                    debug!(agent_id = %id, generation, "Agent reserved");
                    return Ok(Reservation { slot, generation });
                }
                Err(OrchestrationError::AgentBusy(_)) if Instant::now() < deadline => {
                    tokio::time::sleep(poll_interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Returns a busy agent to idle. Idempotent; an unavailable agent stays unavailable.
    pub async fn release(&self, id: &str) -> Result<()> {
        let slot = self.slot(id).await?;
        if slot.release(None) {
            debug!(agent_id = %id, "Agent released");
        }
        Ok(())
    }

    /// Takes an agent out of rotation or returns it.
    ///
    /// Marking a busy agent available is a no-op; it becomes idle on release.
    pub async fn set_availability(&self, id: &str, available: bool) -> Result<AgentStatus> {
        let slot = self.slot(id).await?;
        let mut state = slot.lock();
        state.status = match (state.status, available) {
            (_, false) => AgentStatus::Unavailable,
            (AgentStatus::Unavailable, true) => AgentStatus::Idle,
            (current, true) => current,
        };
        debug!(agent_id = %id, status = ?state.status, "Agent availability changed");
        Ok(state.status)
    }

    /// Snapshot of every registered agent, ordered by ID.
    pub async fn snapshot(&self) -> Vec<AgentSnapshot> {
        let agents = self.agents.read().await;
        let mut snapshot: Vec<AgentSnapshot> = agents
            .values()
            .map(|slot| AgentSnapshot {
                id: slot.agent.id.clone(),
                name: slot.agent.name.clone(),
                capabilities: slot.agent.capabilities.clone(),
                precedence: slot.agent.precedence,
                status: slot.lock().status,
            })
            .collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    /// Checks if an agent is registered.
    pub async fn is_registered(&self, id: &str) -> bool {
        let agents = self.agents.read().await;
        agents.contains_key(id)
    }

    /// Returns the number of registered agents.
    pub async fn count(&self) -> usize {
        let agents = self.agents.read().await;
        agents.len()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str) -> Agent {
        Agent::new(id, id.to_uppercase(), ["code"])
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = AgentRegistry::new();
        registry.register(agent("cursor_ai")).await.unwrap();

        let found = registry.lookup("cursor_ai").await.unwrap();
        assert_eq!(found.id, "cursor_ai");
        assert_eq!(registry.count().await, 1);
        assert_eq!(registry.status("cursor_ai").await.unwrap(), AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_register_duplicate_agent() {
        let registry = AgentRegistry::new();
        registry.register(agent("claude")).await.unwrap();

        let err = registry.register(agent("claude")).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::DuplicateAgent(id) if id == "claude"));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_unknown_agent() {
        let registry = AgentRegistry::new();
        let err = registry.lookup("nonexistent").await.unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownAgent(_)));
    }

    #[tokio::test]
    async fn test_reserve_is_exclusive() {
        let registry = AgentRegistry::new();
        registry.register(agent("claude")).await.unwrap();

        let reservation = registry.reserve("claude").await.unwrap();
        assert_eq!(registry.status("claude").await.unwrap(), AgentStatus::Busy);

        let err = registry.reserve("claude").await.unwrap_err();
        assert!(matches!(err, OrchestrationError::AgentBusy(_)));

        drop(reservation);
        assert_eq!(registry.status("claude").await.unwrap(), AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_double_book() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(agent("figma_ai")).await.unwrap();

        let attempts: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.reserve("figma_ai").await })
            })
            .collect();

        let mut held = Vec::new();
        for attempt in attempts {
            if let Ok(reservation) = attempt.await.unwrap() {
                held.push(reservation);
            }
        }
        assert_eq!(held.len(), 1);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let registry = AgentRegistry::new();
        registry.register(agent("claude")).await.unwrap();

        let reservation = registry.reserve("claude").await.unwrap();
        registry.release("claude").await.unwrap();
        registry.release("claude").await.unwrap();
        assert_eq!(registry.status("claude").await.unwrap(), AgentStatus::Idle);

        // A new holder must survive the stale guard being dropped.
        let second = registry.reserve("claude").await.unwrap();
        drop(reservation);
        assert_eq!(registry.status("claude").await.unwrap(), AgentStatus::Busy);
        drop(second);
        assert_eq!(registry.status("claude").await.unwrap(), AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_unavailable_agent_cannot_be_reserved() {
        let registry = AgentRegistry::new();
        registry.register(agent("claude")).await.unwrap();
        registry.set_availability("claude", false).await.unwrap();

        let err = registry.reserve("claude").await.unwrap_err();
        assert!(matches!(err, OrchestrationError::AgentUnavailable(_)));

        registry.set_availability("claude", true).await.unwrap();
        assert!(registry.reserve("claude").await.is_ok());
    }

    #[tokio::test]
    async fn test_release_keeps_unavailable_agent_out_of_rotation() {
        let registry = AgentRegistry::new();
        registry.register(agent("claude")).await.unwrap();

        let reservation = registry.reserve("claude").await.unwrap();
        registry.set_availability("claude", false).await.unwrap();
        drop(reservation);
        assert_eq!(registry.status("claude").await.unwrap(), AgentStatus::Unavailable);
    }

    #[tokio::test]
    async fn test_reserve_within_waits_for_release() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(agent("cursor_ai")).await.unwrap();
        let first = registry.reserve("cursor_ai").await.unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .reserve_within(
                        "cursor_ai",
                        Duration::from_secs(2),
                        Duration::from_millis(5),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_reserve_within_times_out() {
        let registry = AgentRegistry::new();
        registry.register(agent("cursor_ai")).await.unwrap();
        let _held = registry.reserve("cursor_ai").await.unwrap();

        let err = registry
            .reserve_within("cursor_ai", Duration::from_millis(20), Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::AgentBusy(_)));
    }

    #[tokio::test]
    async fn test_snapshot_is_sorted() {
        let registry = AgentRegistry::new();
        registry.register(agent("figma_ai")).await.unwrap();
        registry.register(agent("claude")).await.unwrap();

        let snapshot = registry.snapshot().await;
        let ids: Vec<_> = snapshot.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["claude", "figma_ai"]);
    }
}
