//! CLI configuration discovery.

use anyhow::Context;
use sadp_orchestrator::OrchestratorConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "SADP_CONFIG";

/// Configuration file picked up from the working directory.
pub const LOCAL_CONFIG: &str = "sadp.toml";

/// Picks the configuration file to load, if any.
///
/// Precedence:
/// 1. `--config <path>`
/// 2. `SADP_CONFIG`
/// 3. `./sadp.toml`
/// 4. Built-in defaults (returns `None`)
pub fn discover(explicit: Option<&Path>, env: Option<&str>, cwd: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env.filter(|p| !p.trim().is_empty()) {
        return Some(PathBuf::from(path));
    }
    let local = cwd.join(LOCAL_CONFIG);
    local.is_file().then_some(local)
}

/// Loads the orchestrator configuration following [`discover`].
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<OrchestratorConfig> {
    let env = std::env::var(CONFIG_ENV).ok();
    let cwd = std::env::current_dir().context("Failed to read current directory")?;

    match discover(explicit, env.as_deref(), &cwd) {
        Some(path) => {
            debug!(path = %path.display(), "Loading configuration");
            OrchestratorConfig::load_from_file(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
        None => {
            debug!("No configuration file found, using defaults");
            Ok(OrchestratorConfig::default())
        }
    }
}
