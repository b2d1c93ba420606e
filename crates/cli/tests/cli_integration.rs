//! CLI integration tests for the offline subcommands.
//!
//! Uses `assert_cmd` to spawn the `cesync` binary and verify
//! exit codes, stdout content, and stderr content.
//!
//! All tests set `current_dir` to the workspace root so that relative
//! paths to `fixtures/` resolve correctly.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Locate the workspace root by walking up from CARGO_MANIFEST_DIR.
fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    // crates/cli -> workspace root is two levels up
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

/// Helper: create a Command for the `cesync` binary, rooted at workspace.
fn cesync() -> Command {
    let mut cmd = cargo_bin_cmd!("cesync");
    cmd.current_dir(workspace_root());
    cmd.env_remove("RUST_LOG");
    for key in ["CESYNC_PORT", "CESYNC_CONFIG", "CESYNC_SCENARIOS_DIR"] {
        cmd.env_remove(key);
    }
    cmd
}

const SCENARIO: &str = "fixtures/scenarios/panel_basic.json";
const DELAYED: &str = "fixtures/documents/session_delayed.json";
const DEVICE_B: &str = "fixtures/documents/session_device_b.json";
const REQUEST: &str = "fixtures/requests/complete_panel.json";

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let text = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("stdout not JSON ({e}): {text}"))
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    cesync()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Cause-and-effect test session sync and deviation analysis",
        ));
}

#[test]
fn version_exits_0() {
    cesync()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cesync"));
}

#[test]
fn unknown_subcommand_fails() {
    cesync().arg("elaborate").assert().failure();
}

// ──────────────────────────────────────────────
// 2. analyze
// ──────────────────────────────────────────────

#[test]
fn analyze_text_reports_medium_delay() {
    cesync()
        .args(["analyze", DELAYED, "--scenario", SCENARIO])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "overall status: completed_with_deviations",
        ))
        .stdout(predicate::str::contains("[medium] door_release (2)"))
        .stdout(predicate::str::contains("faults: 1"));
}

#[test]
fn analyze_json_carries_fault_details() {
    let output = cesync()
        .args(["--output", "json", "analyze", DELAYED, "--scenario", SCENARIO])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output);
    assert_eq!(report["document_id"], "session-delayed");
    assert_eq!(report["overall_status"], "completed_with_deviations");
    let faults = report["faults"].as_array().expect("faults array");
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0]["deviation_ref"], "door_release");
    assert_eq!(faults[0]["severity"], "medium");
    assert_eq!(faults[0]["fault_id"].as_str().map(str::len), Some(64));
    let mut evidence: Vec<&str> = faults[0]["evidence_refs"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    evidence.sort_unstable();
    assert_eq!(evidence, vec!["ev-door-01", "ev-door-02"]);
}

#[test]
fn analyze_rejects_document_for_other_scenario() {
    let dir = TempDir::new().unwrap();
    let scenario = dir.path().join("sprinkler.json");
    fs::write(
        &scenario,
        r#"{"scenario_id": "sprinkler", "name": "Sprinkler",
            "steps": [{"step_id": "pump_start", "name": "Start pump", "expected_seconds": "4"}]}"#,
    )
    .unwrap();

    cesync()
        .args(["analyze", DELAYED, "--scenario"])
        .arg(&scenario)
        .assert()
        .failure()
        .stderr(predicate::str::contains("runs scenario 'panel_basic'"));
}

#[test]
fn analyze_missing_file_fails() {
    cesync()
        .args(["analyze", "fixtures/documents/nope.json", "--scenario", SCENARIO])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error reading file"));
}

#[test]
fn json_errors_are_json_on_stderr() {
    let output = cesync()
        .args([
            "--output",
            "json",
            "analyze",
            "fixtures/documents/nope.json",
            "--scenario",
            SCENARIO,
        ])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let text = String::from_utf8_lossy(&output.stderr);
    let err: serde_json::Value = serde_json::from_str(text.trim()).expect("stderr is JSON");
    assert!(err["error"].as_str().unwrap().contains("nope.json"));
}

#[test]
fn quiet_suppresses_error_output() {
    cesync()
        .args([
            "--quiet",
            "analyze",
            "fixtures/documents/nope.json",
            "--scenario",
            SCENARIO,
        ])
        .assert()
        .failure()
        .stderr(predicate::str::is_empty());
}

// ──────────────────────────────────────────────
// 3. merge
// ──────────────────────────────────────────────

#[test]
fn merge_concurrent_outcomes_flags_review() {
    let output = cesync()
        .args([
            "--output", "json", "merge", DELAYED, DEVICE_B, "--scenario", SCENARIO,
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let response = stdout_json(&output);
    assert_eq!(response["status"], "merged");
    assert_eq!(response["conflicts_resolved"], 1);
    assert_eq!(response["review_required"], serde_json::json!(["panel_activate"]));

    let panel = &response["merged_document"]["steps"]["panel_activate"];
    assert_eq!(panel["status"], "failed");
    assert_eq!(panel["conflicting_outcomes"], true);
    assert_eq!(
        response["merged_document"]["vector_clock"],
        serde_json::json!({"tablet-a": 3, "tablet-b": 1})
    );
}

#[test]
fn merge_is_order_independent() {
    let forward = cesync()
        .args([
            "--output", "json", "merge", DELAYED, DEVICE_B, "--scenario", SCENARIO,
        ])
        .output()
        .unwrap();
    let backward = cesync()
        .args([
            "--output", "json", "merge", DEVICE_B, DELAYED, "--scenario", SCENARIO,
        ])
        .output()
        .unwrap();
    assert_eq!(
        stdout_json(&forward)["merged_document"],
        stdout_json(&backward)["merged_document"]
    );
}

#[test]
fn merge_text_lists_steps() {
    cesync()
        .args(["merge", DELAYED, DEVICE_B, "--scenario", SCENARIO])
        .assert()
        .success()
        .stdout(predicate::str::contains("panel_activate: failed"))
        .stdout(predicate::str::contains("[review]"))
        .stdout(predicate::str::contains("review required: panel_activate"));
}

#[test]
fn merge_of_different_sessions_fails() {
    let dir = TempDir::new().unwrap();
    let other = dir.path().join("other.json");
    fs::write(
        &other,
        r#"{"document_id": "session-other", "scenario_id": "panel_basic",
            "vector_clock": {}, "steps": {}}"#,
    )
    .unwrap();

    cesync()
        .args(["merge", DELAYED])
        .arg(&other)
        .args(["--scenario", SCENARIO])
        .assert()
        .failure()
        .stderr(predicate::str::contains("document mismatch"));
}

// ──────────────────────────────────────────────
// 4. ingest
// ──────────────────────────────────────────────

#[test]
fn ingest_into_empty_session() {
    let output = cesync()
        .args(["--output", "json", "ingest", REQUEST, "--scenario", SCENARIO])
        .output()
        .unwrap();
    assert!(output.status.success());

    let response = stdout_json(&output);
    assert_eq!(response["document_id"], "session-live");
    assert_eq!(response["overall_status"], "in_progress");
    let panel = &response["merged_document"]["steps"]["panel_activate"];
    assert_eq!(panel["status"], "completed");
    assert_eq!(panel["actor"], "tablet-a");
    assert_eq!(panel["evidence_refs"], serde_json::json!(["ev-panel-01"]));
}

#[test]
fn ingest_rejects_document_for_other_session() {
    cesync()
        .args(["ingest", REQUEST, "--scenario", SCENARIO, "--document", DELAYED])
        .assert()
        .failure()
        .stderr(predicate::str::contains("document mismatch"));
}

#[test]
fn ingest_rejects_negative_clock() {
    let dir = TempDir::new().unwrap();
    let request = dir.path().join("bad.json");
    let mut json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(workspace_root().join(REQUEST)).unwrap())
            .unwrap();
    json["vector_clock"]["tablet-a"] = serde_json::json!(-4);
    fs::write(&request, json.to_string()).unwrap();

    cesync()
        .arg("ingest")
        .arg(&request)
        .args(["--scenario", SCENARIO])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid merge request"));
}

#[test]
fn ingest_refuses_batch_that_skips_a_counter() {
    let dir = TempDir::new().unwrap();
    let request = dir.path().join("ahead.json");
    let mut json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(workspace_root().join(REQUEST)).unwrap())
            .unwrap();
    json["vector_clock"]["tablet-a"] = serde_json::json!(4);
    fs::write(&request, json.to_string()).unwrap();

    cesync()
        .arg("ingest")
        .arg(&request)
        .args(["--scenario", SCENARIO])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out-of-order batch"));
}

// ──────────────────────────────────────────────
// 5. serve argument validation
// ──────────────────────────────────────────────

#[test]
fn serve_requires_both_tls_flags() {
    cesync()
        .args(["serve", "--tls-cert", "cert.pem"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--tls-cert and --tls-key"));
}

#[test]
fn serve_rejects_unparseable_config() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("cesync.toml");
    fs::write(&config, "[server\nport = ").unwrap();

    cesync()
        .arg("serve")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("config error"));
}

#[test]
fn serve_reads_config_path_from_env() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("cesync.toml");
    fs::write(&config, "[server\nport = ").unwrap();

    cesync()
        .arg("serve")
        .env("CESYNC_CONFIG", &config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("config error"))
        .stderr(predicate::str::contains("cesync.toml"));
}

#[test]
fn serve_rejects_non_numeric_port_from_env() {
    cesync()
        .arg("serve")
        .env("CESYNC_PORT", "eighty")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--port"));
}

#[cfg(not(feature = "tls"))]
#[test]
fn serve_refuses_tls_paths_without_tls_support() {
    let dir = TempDir::new().unwrap();
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    fs::write(&cert, "").unwrap();
    fs::write(&key, "").unwrap();

    cesync()
        .args(["serve", "--port", "0", "--tls-cert"])
        .arg(&cert)
        .arg("--tls-key")
        .arg(&key)
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .failure()
        .stderr(predicate::str::contains("built without the `tls` feature"));
}
