//! Integration tests for the agent-sandbox CLI.
//!
//! These run the actual executable and check output, exit codes and file
//! system effects. Nothing here reaches the sandbox service.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the agent-sandbox binary.
#[allow(deprecated)]
fn agent_sandbox() -> Command {
    Command::cargo_bin("agent-sandbox").expect("failed to find agent-sandbox binary")
}

/// Creates a Command running in a specific directory.
fn agent_sandbox_in(dir: &TempDir) -> Command {
    let mut cmd = agent_sandbox();
    cmd.current_dir(dir.path());
    cmd
}

// -----------------------------------------------------------------------------
// Help and version tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    agent_sandbox()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("agent-sandbox"))
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("ls"))
        .stdout(predicate::str::contains("cat"))
        .stdout(predicate::str::contains("browse"))
        .stdout(predicate::str::contains("sessions"));
}

#[test]
fn test_version_shows_version() {
    agent_sandbox()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("agent-sandbox"));
}

#[test]
fn test_init_help_shows_force_flag() {
    agent_sandbox()
        .args(["init", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--force"));
}

#[test]
fn test_browse_help_shows_all_options() {
    agent_sandbox()
        .args(["browse", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--text"))
        .stdout(predicate::str::contains("--html"))
        .stdout(predicate::str::contains("--screenshot"))
        .stdout(predicate::str::contains("--full-page"))
        .stdout(predicate::str::contains("--wait-until"));
}

#[test]
fn test_global_options_in_help() {
    agent_sandbox()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("--region"))
        .stdout(predicate::str::contains("--log-file"));
}

// -----------------------------------------------------------------------------
// Init command tests
// -----------------------------------------------------------------------------

#[test]
fn test_init_creates_config() {
    let dir = TempDir::new().unwrap();

    agent_sandbox_in(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"))
        .stdout(predicate::str::contains("Next steps"));

    let content = fs::read_to_string(dir.path().join("agent-sandbox.toml")).unwrap();
    assert!(content.contains("region"));
    assert!(content.contains("[code_interpreter]"));
    assert!(content.contains("[browser]"));
}

#[test]
fn test_init_skips_existing_without_force() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agent-sandbox.toml");
    fs::write(&path, "region = \"eu-central-1\"\n").unwrap();

    agent_sandbox_in(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "region = \"eu-central-1\"\n"
    );
}

#[test]
fn test_init_force_overwrites() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agent-sandbox.toml");
    fs::write(&path, "region = \"eu-central-1\"\n").unwrap();

    agent_sandbox_in(&dir)
        .args(["init", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("overwritten"));

    assert!(fs::read_to_string(&path).unwrap().contains("[browser]"));
}

#[test]
fn test_init_with_log_file() {
    let dir = TempDir::new().unwrap();

    agent_sandbox_in(&dir)
        .args(["--log-file", "sandbox.log", "init"])
        .assert()
        .success();

    assert!(dir.path().join("sandbox.log").exists());
}

// -----------------------------------------------------------------------------
// Argument validation
// -----------------------------------------------------------------------------

#[test]
fn test_unknown_command_fails() {
    agent_sandbox()
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_sessions_rejects_unknown_status() {
    agent_sandbox()
        .args(["sessions", "--status", "sleeping"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown session status"));
}

#[test]
fn test_exec_rejects_unknown_language() {
    agent_sandbox()
        .args(["exec", "--language", "cobol", "print(1)"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown language"));
}

#[test]
fn test_run_requires_command() {
    agent_sandbox().arg("run").assert().failure();
}

#[test]
fn test_cat_requires_paths() {
    agent_sandbox().arg("cat").assert().failure();
}

#[test]
fn test_full_page_requires_screenshot() {
    agent_sandbox()
        .args(["browse", "https://example.com", "--full-page"])
        .assert()
        .failure();
}

#[test]
fn test_invalid_config_fails_before_any_session() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("agent-sandbox.toml"), "region = [").unwrap();

    agent_sandbox_in(&dir)
        .args(["ls"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
