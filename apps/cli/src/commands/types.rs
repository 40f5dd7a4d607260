//! Argument types shared by CLI commands.

use clap::Args;

/// Arguments of `sadp collaborate`.
#[derive(Args, Debug, Clone)]
pub struct CollaborateArgs {
    /// Session title
    #[arg(long)]
    pub title: String,

    /// What the collaborators should produce
    #[arg(long)]
    pub description: String,

    /// Workflow mode (sequential, parallel, interactive, autonomous)
    #[arg(long, default_value = "sequential")]
    pub mode: String,

    /// Comma-separated participant agent IDs, in order
    #[arg(long)]
    pub participants: String,

    /// Comma-separated required capabilities
    #[arg(long)]
    pub capabilities: Option<String>,

    /// Minimum quality score (0-100)
    #[arg(long, default_value_t = 0.0)]
    pub quality_threshold: f64,

    /// Session priority (low, medium, high)
    #[arg(long, default_value = "medium")]
    pub priority: String,

    /// Planner agent for autonomous mode
    #[arg(long)]
    pub planner: Option<String>,

    /// Output the session as JSON
    #[arg(long)]
    pub json: bool,
}
