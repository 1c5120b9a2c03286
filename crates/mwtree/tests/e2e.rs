//! End-to-end CLI integration tests.

use assert_cmd::Command;
use predicates::prelude::*;

fn mwtree() -> Command {
    Command::cargo_bin("mwtree").expect("binary not found")
}

/// Small 2D run: order 1, so every block holds four values.
fn small() -> Command {
    let mut cmd = mwtree();
    cmd.args(["--dim", "2", "-k", "1"]);
    cmd
}

#[test]
fn help_flag() {
    mwtree()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--gen-rounds"));
}

#[test]
fn version_flag() {
    mwtree()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mwtree"));
}

#[test]
fn uniform_refinement_counts_nodes() {
    small()
        .args(["-d", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nodes        21 (end nodes 16)"));
}

#[test]
fn json_report_is_parseable() {
    let output = small().args(["-d", "3", "--json"]).output().unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["nodes"], 85);
    assert_eq!(report["end_nodes"], 64);
    assert_eq!(report["stats"]["gen_nodes"], 0);
    assert_eq!(report["stats"]["depth_counts"], serde_json::json!([1, 4, 16, 64]));
}

#[test]
fn relocate_reports_match() {
    small()
        .args(["-d", "2", "--relocate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("21 nodes rebuilt, match"));
}

#[test]
fn coarsen_removes_finest_level() {
    let output = small()
        .args(["-d", "2", "--coarsen", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["nodes"], 5);
    assert_eq!(report["coarsened_groups"], 4);
}

#[test]
fn output_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    small()
        .args(["-d", "1", "--json", "--output"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(report["nodes"], 5);
}

#[test]
fn verbose_lists_depths() {
    small()
        .args(["-d", "1", "--verbose", "--threads", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("depth   1"))
        .stdout(predicate::str::contains("acquisitions"));
}

#[test]
fn bad_dimension_is_config_error() {
    mwtree()
        .args(["--dim", "4"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("dimension"));
}

#[test]
fn exhausted_budget_is_config_error() {
    small()
        .args(["-d", "3", "--max-nodes", "50"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("persistent slots"));
}

#[test]
fn tiny_memory_limit_is_config_error() {
    small().args(["--memory-limit", "1K"]).assert().code(4);
}

#[test]
fn env_selects_dimension() {
    mwtree()
        .env("MWTREE_DIM", "1")
        .args(["-k", "0", "-d", "4", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"nodes\": 31"));
}

#[test]
fn completion_bash() {
    mwtree()
        .args(["--completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mwtree"));
}
