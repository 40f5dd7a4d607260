//! `sadp demo`: one session per mode over the whole roster.

use anyhow::Context;
use colored::Colorize;
use sadp_orchestrator::{
    CollaborationMode, CollaborationRequest, CollaborationSession, DirectTaskRequest,
    MetricsSnapshot, Orchestrator, OrchestratorConfig, Priority, SessionStatus,
};
use std::time::Duration;
use tabled::{Table, Tabled, settings::Style};
use tracing::{info, warn};

use super::{build_orchestrator, label};

const MODES: [CollaborationMode; 4] = [
    CollaborationMode::Sequential,
    CollaborationMode::Parallel,
    CollaborationMode::Interactive,
    CollaborationMode::Autonomous,
];

#[derive(Tabled)]
struct AgentStatsRow {
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Sessions")]
    sessions: u64,
    #[tabled(rename = "Succeeded")]
    succeeded: u64,
    #[tabled(rename = "Failed")]
    failed: u64,
    #[tabled(rename = "Success %")]
    success_rate: String,
}

/// Execute the demo command.
pub async fn execute(config: &OrchestratorConfig, json: bool, latency: Duration) -> anyhow::Result<()> {
    let roster: Vec<String> = config.agents.iter().map(|a| a.id.clone()).collect();
    if roster.is_empty() {
        anyhow::bail!("The demo needs at least one configured agent");
    }
    let orchestrator = build_orchestrator(config, roster.clone(), latency).await?;

    for mode in MODES {
        let request = CollaborationRequest::new(
            format!("{mode} demo"),
            "Plan, build and document the onboarding flow",
            mode,
            roster.clone(),
        )
        .with_priority(Priority::Medium);
        let session = run_session(&orchestrator, request).await?;
        if !json {
            println!(
                "{} {:<20} rounds={} tasks={} conflicts={}",
                format!("{:<12}", mode.as_str()).bold(),
                label(&session.status),
                session.round,
                session.tasks.len(),
                session.conflicts.len()
            );
        }
    }

    let first = &roster[0];
    let receipt = orchestrator
        .assign_task(DirectTaskRequest {
            agent_id: first.clone(),
            title: "Release notes".to_string(),
            description: "Summarise the demo sessions".to_string(),
            priority: Priority::Low,
        })
        .await
        .context("Failed to assign demo task")?;
    let task = orchestrator.wait_for_task(&receipt.task_id).await?;
    if !json {
        println!("{} {:<20} agent={}", format!("{:<12}", "direct").bold(), label(&task.status), task.agent_id);
        println!();
    }

    let metrics = orchestrator.metrics();
    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        print_metrics(&metrics);
    }
    Ok(())
}

/// Runs a session to a terminal status, settling escalations in favour of
/// the first candidate.
async fn run_session(
    orchestrator: &Orchestrator,
    request: CollaborationRequest,
) -> anyhow::Result<CollaborationSession> {
    let receipt = orchestrator.create_session(request).await?;
    loop {
        let session = orchestrator.wait_for_session(&receipt.session_id).await?;
        if session.status != SessionStatus::ResolvingConflict {
            return Ok(session);
        }
        let mut settled = 0;
        for conflict in session.escalated_conflicts() {
            let Some(winner) = conflict.candidates.first() else { continue };
            info!(
                session_id = %session.id,
                conflict_id = %conflict.id,
                winner = %winner.agent_id,
                "Settling escalated conflict"
            );
            match orchestrator.resolve_conflict(&session.id, &conflict.id, &winner.task_id).await {
                Ok(_) => settled += 1,
                Err(e) => warn!(conflict_id = %conflict.id, error = %e, "Failed to settle conflict"),
            }
        }
        if settled == 0 {
            anyhow::bail!("Session {} is blocked on conflicts that could not be settled", session.id);
        }
    }
}

fn print_metrics(metrics: &MetricsSnapshot) {
    println!("{}", "Metrics".bold());
    println!("  Sessions:         {}", metrics.total_sessions);
    for (status, count) in &metrics.sessions_by_status {
        if *count > 0 {
            println!("    {:<18} {count}", status.as_str());
        }
    }
    println!("  Mean duration:    {:.1} ms", metrics.mean_session_duration_ms);
    println!(
        "  Tasks:            {} succeeded, {} failed, {} cancelled",
        metrics.tasks_succeeded, metrics.tasks_failed, metrics.tasks_cancelled
    );
    println!(
        "  Conflicts:        {} detected, {} resolved, {} escalated",
        metrics.conflicts_detected, metrics.conflicts_resolved, metrics.conflicts_escalated
    );
    println!("  Conflict rate:    {:.1}%", metrics.conflict_rate);
    println!("  Resolution rate:  {:.1}%", metrics.resolution_rate);
    println!("  Mean resolution:  {:.3} ms", metrics.mean_conflict_resolution_ms);
    println!();

    let rows: Vec<AgentStatsRow> = metrics
        .agents
        .iter()
        .map(|(id, stats)| AgentStatsRow {
            agent: id.clone(),
            sessions: stats.sessions,
            succeeded: stats.tasks_succeeded,
            failed: stats.tasks_failed,
            success_rate: format!("{:.1}", stats.success_rate),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}
