//! Orchestrator configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) yields a working three-agent setup.

use crate::error::{OrchestrationError, Result};
use crate::types::Agent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Runtime settings of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Retries after the first failed attempt of a task.
    pub max_task_retries: u32,
    /// Interactive round limit.
    pub max_rounds: u32,
    /// Per-attempt executor timeout.
    pub task_timeout_ms: u64,
    /// How long a dispatch waits for a busy agent.
    pub reservation_timeout_ms: u64,
    /// Poll interval while waiting for a busy agent.
    pub reservation_poll_interval_ms: u64,
    /// Delay between task attempts.
    pub retry_backoff_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_task_retries: 2,
            max_rounds: 3,
            task_timeout_ms: 300_000,
            reservation_timeout_ms: 30_000,
            reservation_poll_interval_ms: 25,
            retry_backoff_ms: 50,
        }
    }
}

impl OrchestratorSettings {
    /// Per-attempt executor timeout.
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Busy-agent wait.
    #[must_use]
    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_millis(self.reservation_timeout_ms)
    }

    /// Busy-agent poll interval.
    #[must_use]
    pub fn reservation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reservation_poll_interval_ms)
    }

    /// Delay between attempts.
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Rejects settings the session driver cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(OrchestrationError::Config("max_rounds must be at least 1".to_string()));
        }
        if self.reservation_poll_interval_ms == 0 {
            return Err(OrchestrationError::Config(
                "reservation_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.task_timeout_ms == 0 {
            return Err(OrchestrationError::Config(
                "task_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Static description of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique identifier.
    pub id: String,
    /// Display name (defaults to the ID).
    #[serde(default)]
    pub name: Option<String>,
    /// Capability tags.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Conflict tie-break precedence.
    #[serde(default)]
    pub precedence: u32,
}

impl AgentConfig {
    /// Builds the registry record.
    #[must_use]
    pub fn to_agent(&self) -> Agent {
        Agent::new(
            self.id.clone(),
            self.name.clone().unwrap_or_else(|| self.id.clone()),
            self.capabilities.iter().cloned(),
        )
        .with_precedence(self.precedence)
    }
}

fn default_agents() -> Vec<AgentConfig> {
    let agent = |id: &str, name: &str, capabilities: &[&str], precedence| AgentConfig {
        id: id.to_string(),
        name: Some(name.to_string()),
        capabilities: capabilities.iter().map(|c| (*c).to_string()).collect(),
        precedence,
    };
    vec![
        agent("claude", "Claude", &["strategy", "documentation", "analysis"], 40),
        agent("cursor_ai", "Cursor AI", &["code", "testing", "refactoring"], 35),
        agent("figma_ai", "Figma AI", &["design", "ux", "prototyping"], 25),
    ]
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Runtime settings.
    #[serde(default)]
    pub settings: OrchestratorSettings,
    /// Agents registered at start-up.
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { settings: OrchestratorSettings::default(), agents: default_agents() }
    }
}

impl OrchestratorConfig {
    /// Parses a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file.
    ///
    /// # Errors
    /// `Config` naming the file when it cannot be read, parsed or validated.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestrationError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| OrchestrationError::Config(format!("{}: {e}", path.display())))
    }

    /// Checks settings and agent entries.
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        let mut seen = BTreeSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(OrchestrationError::Config("agent id must not be empty".to_string()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(OrchestrationError::Config(format!(
                    "agent '{}' is configured more than once",
                    agent.id
                )));
            }
        }
        Ok(())
    }
}
