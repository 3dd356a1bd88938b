//! End-to-end CLI tests using `assert_cmd`.
//!
//! These tests invoke the actual compiled binary and verify exit codes
//! and output. They never reach a hosted LLM (except tests marked #[ignore]).

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const KEY_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GOOGLE_API_KEY",
    "GEMINI_API_KEY",
];

fn cmd() -> Command {
    Command::cargo_bin("sourcelens").unwrap()
}

/// A command with no API keys and its config directory inside `config_home`.
fn isolated(config_home: &Path) -> Command {
    let mut cmd = cmd();
    cmd.env("XDG_CONFIG_HOME", config_home)
        .env("HOME", config_home)
        .env_remove("RUST_LOG");
    for var in KEY_VARS {
        cmd.env_remove(var);
    }
    cmd
}

// ─── Help / version ─────────────────────────────────────────────────────

#[test]
fn test_help_shows_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("providers"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn test_version_shows_semver() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sourcelens"));
}

// ─── Analyze argument validation ────────────────────────────────────────

#[test]
fn test_analyze_help() {
    cmd()
        .args(["analyze", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("QUESTION"))
        .stdout(predicate::str::contains("--backend"))
        .stdout(predicate::str::contains("--deadline"))
        .stdout(predicate::str::contains("--check-urls"))
        .stdout(predicate::str::contains("--output"));
}

#[test]
fn test_analyze_requires_question() {
    cmd()
        .arg("analyze")
        .assert()
        .failure()
        .stderr(predicate::str::contains("QUESTION"));
}

#[test]
fn test_analyze_rejects_invalid_backend() {
    cmd()
        .args(["analyze", "best bank?", "--backend", "mainframe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_analyze_rejects_non_numeric_deadline() {
    cmd()
        .args(["analyze", "best bank?", "--deadline", "soon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

// ─── Analyze without any usable backend ─────────────────────────────────

#[test]
fn test_analyze_without_credentials_fails() {
    let dir = tempdir().unwrap();

    isolated(dir.path())
        .args(["analyze", "Which online bank is best?", "--context", "France"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("none available"))
        .stderr(predicate::str::contains("no backend responded"));
}

#[test]
fn test_analyze_empty_question_is_invalid_input() {
    let dir = tempdir().unwrap();

    isolated(dir.path())
        .args(["analyze", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid input"));
}

#[test]
fn test_analyze_does_not_write_report_on_failure() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("report.json");

    isolated(dir.path())
        .args([
            "analyze",
            "Which online bank is best?",
            "--output",
            output.to_str().unwrap(),
        ])
        .assert()
        .failure();

    assert!(!output.exists());
}

// ─── Init / providers ───────────────────────────────────────────────────

#[test]
fn test_init_writes_config_once() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("sourcelens").join("config.toml");

    isolated(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration"));

    let content = fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("${ANTHROPIC_API_KEY}"));
    assert!(content.contains("deadline_secs"));

    isolated(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));

    isolated(dir.path())
        .args(["init", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration"));
}

#[test]
fn test_providers_reports_missing_credentials() {
    let dir = tempdir().unwrap();

    isolated(dir.path())
        .arg("providers")
        .assert()
        .success()
        .stdout(predicate::str::contains("openai"))
        .stdout(predicate::str::contains("anthropic"))
        .stdout(predicate::str::contains("google"))
        .stdout(predicate::str::contains("No credentials"))
        .stdout(predicate::str::contains("ollama").not());
}

#[test]
fn test_providers_picks_up_environment_key() {
    let dir = tempdir().unwrap();

    isolated(dir.path())
        .env("OPENAI_API_KEY", "sk-test")
        .arg("providers")
        .assert()
        .success()
        .stdout(predicate::str::contains("Available"))
        .stdout(predicate::str::contains("1 of 3"));
}

#[test]
fn test_providers_reads_config_file() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("sourcelens");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("config.toml"),
        r#"
[providers.ollama]
base_url = "http://localhost:11434"
model = "mistral"
"#,
    )
    .unwrap();

    isolated(dir.path())
        .arg("providers")
        .assert()
        .success()
        .stdout(predicate::str::contains("ollama"))
        .stdout(predicate::str::contains("mistral"))
        .stdout(predicate::str::contains("openai").not());
}

// ─── Integration: real backends (requires API keys) ─────────────────────

#[test]
#[ignore] // Run with: cargo test -- --ignored
fn test_analyze_with_real_backends() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("report.json");

    cmd()
        .args([
            "analyze",
            "Which online bank is best?",
            "--context",
            "France",
            "--output",
            output.to_str().unwrap(),
        ])
        .timeout(std::time::Duration::from_secs(600))
        .assert()
        .success()
        .stdout(predicate::str::contains("Sources"));

    let content = fs::read_to_string(&output).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert!(parsed["sources"].is_array());
    assert!(parsed["entity_consensus"].is_object());
}
