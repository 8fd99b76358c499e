//! CLI tests for the modbridge binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn modbridge() -> Command {
    Command::cargo_bin("modbridge").expect("binary should build")
}

#[test]
fn test_config_prints_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    modbridge()
        .current_dir(temp_dir.path())
        .env("XDG_CONFIG_HOME", temp_dir.path())
        .env("HOME", temp_dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("use-timeout-ms: 5000"))
        .stdout(predicate::str::contains("diagnostics-channel:"));
}

#[test]
fn test_config_reads_explicit_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("custom.yml");
    std::fs::write(&path, "bridge:\n  wait-timeout-ms: 750\n").unwrap();

    modbridge()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("wait-timeout-ms: 750"));
}

#[test]
fn test_missing_explicit_config_fails() {
    modbridge()
        .args(["--config", "/nonexistent/modbridge.yml", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load"));
}

#[test]
fn test_demo_runs() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    modbridge()
        .current_dir(temp_dir.path())
        .env("XDG_CONFIG_HOME", temp_dir.path())
        .env("NO_COLOR", "1")
        .arg("demo")
        .assert()
        .success()
        .stdout(predicate::str::contains("resolved audio"))
        .stdout(predicate::str::contains("reclaimed 1"));
}

#[test]
fn test_demo_reverse_with_metrics() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    modbridge()
        .current_dir(temp_dir.path())
        .env("XDG_CONFIG_HOME", temp_dir.path())
        .args(["demo", "--reverse", "--metrics"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"subscriber_errors\": 0"));
}

#[test]
fn test_invalid_log_level() {
    modbridge()
        .args(["--log-level", "loud", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log level"));
}
