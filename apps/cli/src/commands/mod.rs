//! Command implementations for the SADP CLI.

pub mod agents;
pub mod assign;
pub mod collaborate;
pub mod demo;
pub mod types;

pub use types::CollaborateArgs;

use anyhow::Context;
use sadp_orchestrator::{AgentConfig, Orchestrator, OrchestratorConfig};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::simulated::SimulatedExecutor;

/// Builds an orchestrator over the configured agents, backed by the
/// simulated executor planning over the configured agents named in `roster`.
pub async fn build_orchestrator(
    config: &OrchestratorConfig,
    roster: Vec<String>,
    latency: Duration,
) -> anyhow::Result<Orchestrator> {
    let agents = roster
        .iter()
        .filter_map(|id| config.agents.iter().find(|a| &a.id == id))
        .map(AgentConfig::to_agent);
    let executor = SimulatedExecutor::new(agents).with_latency(latency);
    Orchestrator::from_config(config, Arc::new(executor))
        .await
        .context("Failed to initialise orchestrator")
}

/// Snake-case wire name of a serializable enum value.
pub fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => name,
        Ok(other) => other.to_string(),
        Err(_) => String::from("?"),
    }
}

/// Splits a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sadp_orchestrator::{SessionStatus, TaskStatus};

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("claude, cursor_ai,,figma_ai "), ["claude", "cursor_ai", "figma_ai"]);
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn test_label_uses_wire_names() {
        assert_eq!(label(&SessionStatus::ResolvingConflict), "resolving_conflict");
        assert_eq!(label(&TaskStatus::Succeeded), "succeeded");
    }
}
