//! `sadp agents`: registry snapshot.

use colored::Colorize;
use sadp_orchestrator::{AgentSnapshot, AgentStatus, OrchestratorConfig};
use std::time::Duration;
use tabled::{Table, Tabled, settings::Style};

use super::{build_orchestrator, label};

#[derive(Tabled)]
struct AgentRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Capabilities")]
    capabilities: String,
    #[tabled(rename = "Precedence")]
    precedence: u32,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&AgentSnapshot> for AgentRow {
    fn from(agent: &AgentSnapshot) -> Self {
        let status = match agent.status {
            AgentStatus::Idle => label(&agent.status).green().to_string(),
            AgentStatus::Busy => label(&agent.status).yellow().to_string(),
            AgentStatus::Unavailable => label(&agent.status).red().to_string(),
        };
        Self {
            id: agent.id.clone(),
            name: agent.name.clone(),
            capabilities: agent.capabilities.iter().cloned().collect::<Vec<_>>().join(", "),
            precedence: agent.precedence,
            status,
        }
    }
}

/// Execute the agents command.
pub async fn execute(config: &OrchestratorConfig, json: bool) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, Vec::new(), Duration::ZERO).await?;
    let agents = orchestrator.list_agents().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }

    if agents.is_empty() {
        println!("{}", "No agents configured.".yellow());
        return Ok(());
    }

    let rows: Vec<AgentRow> = agents.iter().map(AgentRow::from).collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!();
    println!("{} agent(s) registered", agents.len().to_string().bold());
    Ok(())
}
