//! Process-level exit code checks for the `phaseline` binary
//!
//! Each test runs in a fresh directory with a `.git` marker so config
//! discovery never walks into the developer's own settings.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join(".git")).unwrap();
    temp
}

fn phaseline(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("phaseline").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("PHASELINE_BUDGET_LIMIT")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("OPENROUTER_API_KEY");
    cmd
}

#[test]
fn test_list_workflows_succeeds() {
    let dir = workspace();
    phaseline(&dir)
        .arg("list-workflows")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("feature_implementation"))
        .stdout(predicate::str::contains("quick_fix"));
}

#[test]
fn test_list_backends_json() {
    let dir = workspace();
    let output = phaseline(&dir)
        .args(["list-backends", "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> = report["backends"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|b| b["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["cloud-sonnet", "local-coder"]);
}

#[test]
fn test_bad_arguments_exit_2() {
    let dir = workspace();
    phaseline(&dir).args(["run", "--workflow"]).assert().code(2);
    phaseline(&dir).arg("no-such-command").assert().code(2);
}

#[test]
fn test_unknown_workflow_exits_4() {
    let dir = workspace();
    phaseline(&dir)
        .args(["run", "--workflow", "nope", "--input", "x", "--dry-run"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_empty_input_is_rejected() {
    let dir = workspace();
    phaseline(&dir)
        .args(["run", "--workflow", "quick_fix", "--input", "   ", "--dry-run"])
        .assert()
        .code(4);
}

#[test]
fn test_dry_run_succeeds_without_writing() {
    let dir = workspace();
    phaseline(&dir)
        .args([
            "run",
            "--workflow",
            "quick_fix",
            "--input",
            "Fix the date parser",
            "--dry-run",
        ])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("succeeded"));

    assert!(!dir.path().join("specifications").exists());
    assert!(!dir.path().join(".phaseline").exists());
}

#[test]
fn test_dry_run_json_report() {
    let dir = workspace();
    let output = phaseline(&dir)
        .args([
            "run",
            "--workflow",
            "feature_implementation",
            "--input",
            "Add CSV export",
            "--dry-run",
            "--json",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "succeeded");
    assert_eq!(report["workflow_id"], "feature_implementation");
    let phases: Vec<&str> = report["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["phase"].as_str())
        .collect();
    assert_eq!(phases.len(), 5);
    assert!(phases.contains(&"review"));
    assert_eq!(report["ledger"]["outstanding_reservations"], 0);
}

#[test]
fn test_budget_reports_default_limit() {
    let dir = workspace();
    phaseline(&dir)
        .arg("budget")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Limit:"))
        .stdout(predicate::str::contains("not persisted"));
}

#[test]
fn test_specs_show_missing_fails() {
    let dir = workspace();
    phaseline(&dir)
        .args(["specs", "show", "missing"])
        .assert()
        .failure();
}

#[test]
fn test_invalid_config_file_exits_4() {
    let dir = workspace();
    let cfg = dir.path().join(".phaseline");
    std::fs::create_dir_all(&cfg).unwrap();
    std::fs::write(cfg.join("config.toml"), "[defaults]\nunknown_key = 1\n").unwrap();

    phaseline(&dir).arg("list-workflows").assert().code(4);
}
