//! CLI tests for the `sq` binary

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// `sq` isolated from the user's config and data directories
fn sq(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sq").expect("sq binary should build");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"));
    cmd
}

#[test]
fn test_help() {
    let home = TempDir::new().unwrap();
    sq(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simulate"));
}

#[test]
fn test_simulate_json_report() {
    let home = TempDir::new().unwrap();
    let output = sq(&home)
        .args(["simulate", "--tasks", "6", "--seed", "3", "--failure-rate", "0", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["submitted"], 6);
    assert_eq!(report["metrics"]["completed"], 6);
    assert_eq!(report["metrics"]["failed"], 0);
    assert_eq!(report["admission_order"].as_array().map(Vec::len), Some(6));
}

#[test]
fn test_simulate_text_report() {
    let home = TempDir::new().unwrap();
    sq(&home)
        .args(["simulate", "--tasks", "3", "--seed", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SmartQueue Simulation"))
        .stdout(predicate::str::contains("task-000"));
}

#[test]
fn test_simulate_rejects_bad_failure_rate() {
    let home = TempDir::new().unwrap();
    sq(&home)
        .args(["simulate", "--tasks", "1", "--failure-rate", "2.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failure-rate"));
}

#[test]
fn test_config_reads_local_file() {
    let home = TempDir::new().unwrap();
    fs::write(
        home.path().join(".smartqueue.yml"),
        "scheduler:\n  max-concurrency: 3\nsimulation:\n  tasks: 2\n",
    )
    .unwrap();

    sq(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max-concurrency: 3"))
        .stdout(predicate::str::contains("tasks: 2"));
}
