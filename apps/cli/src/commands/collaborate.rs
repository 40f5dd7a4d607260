//! `sadp collaborate`: run one session to a settled state.

use anyhow::Context;
use colored::Colorize;
use sadp_orchestrator::{
    CollaborationMode, CollaborationRequest, CollaborationSession, OrchestratorConfig, Priority,
    Requirements, Resolution, SessionStatus,
};
use std::time::Duration;
use tabled::{Table, Tabled, settings::Style};
use tracing::info;

use super::{CollaborateArgs, build_orchestrator, label, split_list};

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "Round")]
    round: u32,
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Quality")]
    quality: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Tabled)]
struct ConflictRow {
    #[tabled(rename = "Round")]
    round: u32,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Agents")]
    agents: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// Builds the session request from command-line arguments.
pub fn build_request(args: &CollaborateArgs) -> anyhow::Result<CollaborationRequest> {
    let mode: CollaborationMode = args.mode.parse()?;
    let priority: Priority = args.priority.parse()?;
    let capabilities = args.capabilities.as_deref().map(split_list).unwrap_or_default();

    let mut request =
        CollaborationRequest::new(&args.title, &args.description, mode, split_list(&args.participants))
            .with_requirements(Requirements::new(capabilities, args.quality_threshold))
            .with_priority(priority);
    if let Some(planner) = &args.planner {
        request = request.with_planner(planner);
    }
    request.validate()?;
    Ok(request)
}

/// Execute the collaborate command.
pub async fn execute(
    config: &OrchestratorConfig,
    args: CollaborateArgs,
    latency: Duration,
) -> anyhow::Result<()> {
    let request = build_request(&args)?;
    let orchestrator = build_orchestrator(config, request.participants.clone(), latency).await?;

    let receipt = orchestrator.create_session(request).await.context("Failed to create session")?;
    info!(session_id = %receipt.session_id, "Session created");
    let session = orchestrator.wait_for_session(&receipt.session_id).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        print_session(&session);
    }

    match session.status {
        SessionStatus::Failed => {
            let reason = session.failure.map(|f| f.message).unwrap_or_default();
            anyhow::bail!("Session {} failed: {}", session.id, reason)
        }
        SessionStatus::Cancelled => anyhow::bail!("Session {} was cancelled", session.id),
        _ => Ok(()),
    }
}

fn status_label(status: SessionStatus) -> String {
    let text = status.to_string();
    match status {
        SessionStatus::Completed => text.green().bold().to_string(),
        SessionStatus::Failed | SessionStatus::Cancelled => text.red().bold().to_string(),
        _ => text.yellow().bold().to_string(),
    }
}

/// Prints a human-readable view of a settled session.
pub fn print_session(session: &CollaborationSession) {
    println!("{} {}", "Session".bold(), session.id.cyan());
    println!("  Title:  {}", session.request.title);
    println!("  Mode:   {}", session.request.mode);
    println!("  Status: {}", status_label(session.status));
    println!("  Rounds: {}", session.round);
    println!();

    if !session.tasks.is_empty() {
        let rows: Vec<TaskRow> = session
            .tasks
            .iter()
            .map(|task| TaskRow {
                round: task.round,
                agent: task.agent_id.clone(),
                status: label(&task.status),
                attempts: task.attempts,
                quality: task
                    .result
                    .as_ref()
                    .and_then(|r| r.as_work())
                    .map_or_else(|| "-".to_string(), |w| format!("{:.1}", w.quality_score)),
                description: task.description.clone(),
            })
            .collect();
        println!("{}", "Tasks".bold());
        println!("{}", Table::new(rows).with(Style::rounded()));
        println!();
    }

    if !session.conflicts.is_empty() {
        let rows: Vec<ConflictRow> = session
            .conflicts
            .iter()
            .map(|conflict| ConflictRow {
                round: conflict.round,
                kind: label(&conflict.kind),
                key: conflict.key.clone(),
                agents: conflict.agents.iter().cloned().collect::<Vec<_>>().join(", "),
                outcome: match &conflict.resolution {
                    Resolution::Resolved(decision) => {
                        format!("{} ({})", decision.agent_id, label(&decision.method))
                    }
                    Resolution::Escalated => "escalated".to_string(),
                    Resolution::Pending => "pending".to_string(),
                },
            })
            .collect();
        println!("{}", "Conflicts".bold());
        println!("{}", Table::new(rows).with(Style::rounded()));
        println!();
    }

    if !session.output.artifacts.is_empty() {
        println!("{}", "Accepted artifacts".bold());
        for (key, value) in &session.output.artifacts {
            println!("  {} = {}", key.cyan(), value);
        }
        println!();
    }

    if let Some(failure) = &session.failure {
        println!("{} [{}] {}", "Failure:".red().bold(), failure.code, failure.message);
    }
    if session.status == SessionStatus::ResolvingConflict {
        println!(
            "{} {} conflict(s) need an external decision",
            "Blocked:".yellow().bold(),
            session.escalated_conflicts().count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(mode: &str) -> CollaborateArgs {
        CollaborateArgs {
            title: "Landing page".to_string(),
            description: "Ship the new landing page".to_string(),
            mode: mode.to_string(),
            participants: "claude,figma_ai, cursor_ai".to_string(),
            capabilities: Some("design,code".to_string()),
            quality_threshold: 75.0,
            priority: "high".to_string(),
            planner: None,
            json: false,
        }
    }

    #[test]
    fn test_build_request() {
        let request = build_request(&args("parallel")).unwrap();
        assert_eq!(request.mode, CollaborationMode::Parallel);
        assert_eq!(request.participants, ["claude", "figma_ai", "cursor_ai"]);
        assert_eq!(request.priority, Priority::High);
        assert!(request.requirements.capabilities.contains("design"));
        assert!((request.requirements.quality_threshold - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_build_request_rejects_unknown_mode() {
        assert!(build_request(&args("freestyle")).is_err());
    }

    #[test]
    fn test_build_request_rejects_empty_participants() {
        let mut bad = args("sequential");
        bad.participants = " , ".to_string();
        assert!(build_request(&bad).is_err());
    }
}
