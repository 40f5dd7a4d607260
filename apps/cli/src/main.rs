//! SADP CLI - command-line front end for the collaboration orchestrator
//!
//! Provides the `sadp` command, which loads the agent roster, runs
//! collaboration sessions and direct tasks against a simulated executor, and
//! prints the settled results.

mod commands;
mod config;
mod simulated;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::{CollaborateArgs, agents, assign, collaborate, demo};

/// SADP - multi-agent collaboration orchestrator
///
/// Coordinates several AI agents on shared tasks: sessions in sequential,
/// parallel, interactive or autonomous mode, conflict resolution between
/// their outputs, and aggregate metrics.
#[derive(Parser, Debug)]
#[command(
    name = "sadp",
    author,
    version,
    about = "SADP - multi-agent collaboration orchestrator",
    long_about = None
)]
struct Args {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Configuration file (overrides SADP_CONFIG and ./sadp.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Simulated agent latency in milliseconds
    #[arg(long, default_value_t = 0, global = true)]
    latency_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered agents and their status
    Agents {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one collaboration session and print its settled state
    Collaborate(CollaborateArgs),

    /// Assign a task directly to one agent
    Assign {
        /// Target agent ID
        #[arg(short, long)]
        agent: String,

        /// Task title
        #[arg(short, long)]
        title: String,

        /// Task description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Task priority (low, medium, high)
        #[arg(short, long, default_value = "medium")]
        priority: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one session per mode and print the metrics snapshot
    Demo {
        /// Output metrics as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{level}'"))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let result = if json { builder.json().try_init() } else { builder.without_time().try_init() };
    result.map_err(|e| anyhow::anyhow!("Failed to initialise logging: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json)?;

    let config = config::load_config(args.config.as_deref())?;
    let latency = std::time::Duration::from_millis(args.latency_ms);

    match args.command {
        Command::Agents { json } => agents::execute(&config, json).await,
        Command::Collaborate(collaborate_args) => {
            collaborate::execute(&config, collaborate_args, latency).await
        }
        Command::Assign { agent, title, description, priority, json } => {
            assign::execute(&config, agent, title, description, &priority, json, latency).await
        }
        Command::Demo { json } => demo::execute(&config, json, latency).await,
    }
}
