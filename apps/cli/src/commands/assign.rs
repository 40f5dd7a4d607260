//! `sadp assign`: run a direct task on one agent.

use anyhow::Context;
use colored::Colorize;
use sadp_orchestrator::{DirectTaskRequest, OrchestratorConfig, Priority, TaskStatus};
use std::time::Duration;

use super::{build_orchestrator, label};

/// Execute the assign command.
pub async fn execute(
    config: &OrchestratorConfig,
    agent_id: String,
    title: String,
    description: String,
    priority: &str,
    json: bool,
    latency: Duration,
) -> anyhow::Result<()> {
    let priority: Priority = priority.parse()?;
    let orchestrator = build_orchestrator(config, vec![agent_id.clone()], latency).await?;

    let receipt = orchestrator
        .assign_task(DirectTaskRequest { agent_id: agent_id.clone(), title, description, priority })
        .await
        .with_context(|| format!("Failed to assign task to '{agent_id}'"))?;
    let task = orchestrator.wait_for_task(&receipt.task_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        println!("{} {}", "Task".bold(), task.id.cyan());
        println!("  Agent:    {}", task.agent_id);
        println!("  Priority: {}", task.priority);
        println!("  Status:   {}", label(&task.status));
        println!("  Attempts: {}", task.attempts);
        if let Some(work) = task.result.as_ref().and_then(|r| r.as_work()) {
            println!("  Quality:  {:.1}", work.quality_score);
            println!("  Summary:  {}", work.summary);
        }
        if let Some(error) = &task.error {
            println!("  {} {}", "Error:".red().bold(), error);
        }
    }

    if task.status == TaskStatus::Failed {
        anyhow::bail!("Task {} failed", task.id);
    }
    Ok(())
}
