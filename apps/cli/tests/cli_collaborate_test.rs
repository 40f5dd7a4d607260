//! Integration tests for the `sadp` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Runs `sadp` in an empty directory so no stray `sadp.toml` is picked up.
fn sadp(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sadp").unwrap();
    cmd.current_dir(dir.path()).env_remove("SADP_CONFIG").env("RUST_LOG", "error");
    cmd
}

#[test]
fn test_agents_lists_default_roster() {
    let dir = TempDir::new().unwrap();
    sadp(&dir)
        .arg("agents")
        .assert()
        .success()
        .stdout(predicate::str::contains("claude"))
        .stdout(predicate::str::contains("cursor_ai"))
        .stdout(predicate::str::contains("figma_ai"));
}

#[test]
fn test_agents_json_uses_local_config() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sadp.toml"),
        r#"
[[agents]]
id = "writer"
name = "Writer"
capabilities = ["documentation"]
precedence = 5
"#,
    )
    .unwrap();

    let output = sadp(&dir).args(["agents", "--json"]).output().unwrap();
    assert!(output.status.success());
    let agents: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(agents.as_array().unwrap().len(), 1);
    assert_eq!(agents[0]["id"], "writer");
    assert_eq!(agents[0]["status"], "idle");
}

#[test]
fn test_collaborate_sequential_completes() {
    let dir = TempDir::new().unwrap();
    let output = sadp(&dir)
        .args([
            "collaborate",
            "--title",
            "Onboarding",
            "--description",
            "Design and build onboarding",
            "--mode",
            "sequential",
            "--participants",
            "claude,cursor_ai",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let session: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(session["status"], "completed");
    assert_eq!(session["tasks"].as_array().unwrap().len(), 2);
    assert_eq!(session["tasks"][0]["agent_id"], "claude");
    assert_eq!(session["tasks"][1]["agent_id"], "cursor_ai");
}

#[test]
fn test_collaborate_parallel_resolves_shared_artifact_by_precedence() {
    let dir = TempDir::new().unwrap();
    let output = sadp(&dir)
        .args([
            "collaborate",
            "--title",
            "Pitch",
            "--description",
            "Draft the pitch",
            "--mode",
            "parallel",
            "--participants",
            "figma_ai,claude",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let session: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(session["status"], "completed");
    let conflict = &session["conflicts"][0];
    assert_eq!(conflict["key"], "summary");
    assert_eq!(conflict["resolution"]["outcome"], "resolved");
    assert_eq!(conflict["resolution"]["agent_id"], "claude");
    assert_eq!(conflict["resolution"]["method"], "priority");
}

#[test]
fn test_collaborate_unsatisfiable_requirement_fails() {
    let dir = TempDir::new().unwrap();
    sadp(&dir)
        .args([
            "collaborate",
            "--title",
            "Audit",
            "--description",
            "Audit the ledger",
            "--participants",
            "claude",
            "--capabilities",
            "accounting",
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed"))
        .stderr(predicate::str::contains("accounting"));
}

#[test]
fn test_collaborate_autonomous_plans_over_qualifying_agents() {
    let dir = TempDir::new().unwrap();
    let output = sadp(&dir)
        .args([
            "collaborate",
            "--title",
            "Checkout",
            "--description",
            "Build the checkout",
            "--mode",
            "autonomous",
            "--participants",
            "claude,cursor_ai,figma_ai",
            "--capabilities",
            "code",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let session: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(session["status"], "completed");
    let tasks = session["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t["agent_id"] == "cursor_ai"));
}

#[test]
fn test_collaborate_rejects_unknown_mode() {
    let dir = TempDir::new().unwrap();
    sadp(&dir)
        .args([
            "collaborate",
            "--title",
            "x",
            "--description",
            "y",
            "--mode",
            "freestyle",
            "--participants",
            "claude",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown collaboration mode"));
}

#[test]
fn test_assign_runs_direct_task() {
    let dir = TempDir::new().unwrap();
    let output = sadp(&dir)
        .args(["assign", "--agent", "cursor_ai", "--title", "Fix build", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let task: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(task["status"], "succeeded");
    assert_eq!(task["agent_id"], "cursor_ai");
    assert!(task["session_id"].is_null());
}

#[test]
fn test_assign_unknown_agent_fails() {
    let dir = TempDir::new().unwrap();
    sadp(&dir)
        .args(["assign", "--agent", "ghost", "--title", "Haunt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn test_demo_reports_metrics() {
    let dir = TempDir::new().unwrap();
    let output = sadp(&dir).args(["demo", "--json"]).output().unwrap();
    assert!(output.status.success());

    let metrics: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(metrics["total_sessions"], 4);
    assert_eq!(metrics["sessions_by_status"]["completed"], 4);
    assert_eq!(metrics["tasks_failed"], 0);
    assert!(metrics["conflicts_detected"].as_u64().unwrap() >= 1);
    assert!(metrics["mean_conflict_resolution_ms"].as_f64().unwrap() >= 0.0);
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = TempDir::new().unwrap();
    sadp(&dir)
        .args(["--config", "nope.toml", "agents"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.toml"));
}
