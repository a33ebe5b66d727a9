//! CLI Integration Tests
//!
//! These tests verify that the CLI commands work correctly end-to-end.
//! They test the actual binary behavior, not just the library.
//!
//! Run with:
//! ```bash
//! cargo test --test cli_integration
//! ```

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

/// Get the path to the built binary
fn anchor_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_anchor"))
}

/// Run anchor against `db_path` and return (stdout, stderr, success)
///
/// The config directory points into the test's temp dir so a user config
/// file cannot leak in.
fn run_anchor(args: &[&str], db_path: &Path) -> (String, String, bool) {
    let config_home = db_path.parent().unwrap().join("config");
    let output = Command::new(anchor_binary())
        .env("XDG_CONFIG_HOME", &config_home)
        .env_remove("DISABLE_BLOCKCHAIN")
        .env_remove("ANCHOR_KEY_LENGTH")
        .env("RUST_LOG", "warn")
        .arg("-d")
        .arg(db_path)
        .args(["-f", "json"])
        .args(args)
        .output()
        .expect("Failed to execute anchor");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout.trim()).unwrap_or_else(|e| panic!("bad JSON {:?}: {}", stdout, e))
}

const ZERO_ROOT: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

// ============================================================================
// Database Initialization Tests
// ============================================================================

#[test]
fn test_cli_init_creates_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("anchors.smt");

    let (stdout, _stderr, success) = run_anchor(&["init"], &db_path);

    assert!(success, "init should succeed");
    assert_eq!(json(&stdout)["status"], "ok");
    assert!(db_path.exists(), "database file should be created");
}

#[test]
fn test_cli_init_twice_fails() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("anchors.smt");

    run_anchor(&["init"], &db_path);
    let (_stdout, stderr, success) = run_anchor(&["init"], &db_path);

    assert!(!success, "second init should fail");
    assert!(stderr.contains("Already exists"), "got: {}", stderr);
}

#[test]
fn test_cli_help_lists_commands() {
    let output = Command::new(anchor_binary())
        .args(["--help"])
        .output()
        .expect("Failed to execute anchor");

    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["init", "doctor", "prescription", "root", "proof", "queue", "reconcile", "watch"] {
        assert!(stdout.contains(command), "help should list {}, got: {}", command, stdout);
    }
    assert!(stdout.contains("[default: json]"));
}

// ============================================================================
// Record Tests
// ============================================================================

#[test]
fn test_cli_create_doctor_anchors_root() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("anchors.smt");
    run_anchor(&["init"], &db_path);

    let (stdout, _stderr, success) = run_anchor(
        &["doctor", "create", "--license", "4411", "--user-id", "8"],
        &db_path,
    );
    assert!(success, "doctor create should succeed");
    let doctor = json(&stdout);
    assert_eq!(doctor["id"], 1);
    assert_eq!(doctor["license"], 4411);

    let (stdout, _stderr, success) = run_anchor(&["root", "doctors"], &db_path);
    assert!(success);
    let root = json(&stdout)["doctors"].as_str().unwrap().to_string();
    assert_ne!(root, ZERO_ROOT);

    // The instant ledger confirmed the entry during the command
    let (stdout, _stderr, _) = run_anchor(&["queue"], &db_path);
    let queues = json(&stdout);
    assert_eq!(queues["doctors"].as_array().unwrap().len(), 0);
    assert_eq!(queues["prescriptions"].as_array().unwrap().len(), 0);
}

#[test]
fn test_cli_prescription_lifecycle() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("anchors.smt");
    run_anchor(&["init"], &db_path);
    run_anchor(
        &["doctor", "create", "--license", "1", "--user-id", "2"],
        &db_path,
    );

    let (stdout, stderr, success) = run_anchor(
        &[
            "prescription",
            "create",
            "--doctor",
            "1",
            "--presentation",
            "30",
            "--patient",
            "9",
            "--quantity",
            "2",
        ],
        &db_path,
    );
    assert!(success, "prescription create failed: {}", stderr);
    let prescription = json(&stdout);
    assert_eq!(prescription["id"], 1);
    assert_eq!(prescription["used"], false);

    let (stdout, _stderr, success) = run_anchor(&["prescription", "verify", "1"], &db_path);
    assert!(success);
    assert_eq!(json(&stdout)["valid"], true);

    let (stdout, _stderr, success) = run_anchor(
        &["prescription", "use", "1", "--pharmacist", "55"],
        &db_path,
    );
    assert!(success);
    let used = json(&stdout);
    assert_eq!(used["used"], true);
    assert_eq!(used["pharmacist_id"], 55);

    // A second dispensation is refused
    let (_stdout, _stderr, success) = run_anchor(
        &["prescription", "use", "1", "--pharmacist", "56"],
        &db_path,
    );
    assert!(!success);

    let (stdout, _stderr, success) = run_anchor(&["prescription", "verify", "1"], &db_path);
    assert!(success);
    assert_eq!(json(&stdout)["valid"], true);
}

#[test]
fn test_cli_prescription_requires_doctor() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("anchors.smt");
    run_anchor(&["init"], &db_path);

    let (_stdout, stderr, success) = run_anchor(
        &[
            "prescription",
            "create",
            "--doctor",
            "7",
            "--presentation",
            "1",
            "--patient",
            "1",
        ],
        &db_path,
    );
    assert!(!success);
    assert!(stderr.contains("Not found"), "got: {}", stderr);
}

#[test]
fn test_cli_proof_verifies_against_root() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("anchors.smt");
    run_anchor(&["init"], &db_path);
    for license in ["10", "11", "12"] {
        run_anchor(
            &["doctor", "create", "--license", license, "--user-id", "1"],
            &db_path,
        );
    }

    let (stdout, _stderr, success) = run_anchor(&["proof", "doctors", "2"], &db_path);
    assert!(success);
    let proof = json(&stdout);
    assert_eq!(proof["key"], 2);
    assert_eq!(proof["siblings"].as_array().unwrap().len(), 24);

    let (stdout, _stderr, _) = run_anchor(&["root", "doctors"], &db_path);
    assert_eq!(proof["root"], json(&stdout)["doctors"]);

    let (_stdout, _stderr, success) = run_anchor(&["proof", "doctors", "9"], &db_path);
    assert!(!success, "missing leaf should fail");
}

// ============================================================================
// Reconciliation and Offline Mode
// ============================================================================

#[test]
fn test_cli_reconcile_reports_tick() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("anchors.smt");
    run_anchor(&["init"], &db_path);

    let (stdout, _stderr, success) = run_anchor(&["reconcile"], &db_path);
    assert!(success);
    let report = json(&stdout);
    assert_eq!(report["confirmed"], 0);
    assert_eq!(report["reverted"], 0);
    assert_eq!(report["skipped"], false);
}

#[test]
fn test_cli_offline_stores_without_anchoring() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("anchors.smt");
    run_anchor(&["init"], &db_path);

    let offline = |args: &[&str]| {
        let mut full = vec!["--ledger", "offline"];
        full.extend_from_slice(args);
        run_anchor(&full, &db_path)
    };

    let (_stdout, _stderr, success) =
        offline(&["doctor", "create", "--license", "3", "--user-id", "3"]);
    assert!(success);
    let (_stdout, stderr, success) = offline(&[
        "prescription",
        "create",
        "--doctor",
        "1",
        "--presentation",
        "1",
        "--patient",
        "1",
    ]);
    assert!(success, "offline prescription failed: {}", stderr);

    let (stdout, _stderr, _) = offline(&["root"]);
    let roots = json(&stdout);
    assert_eq!(roots["doctors"], ZERO_ROOT);
    assert_eq!(roots["prescriptions"], ZERO_ROOT);

    let (stdout, _stderr, success) = offline(&["prescription", "verify", "1"]);
    assert!(success);
    assert_eq!(json(&stdout)["valid"], true);
}

#[test]
fn test_cli_data_survives_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("anchors.smt");
    run_anchor(&["init"], &db_path);
    run_anchor(
        &["doctor", "create", "--license", "77", "--user-id", "1"],
        &db_path,
    );
    let (before, _, _) = run_anchor(&["root"], &db_path);

    run_anchor(
        &["doctor", "create", "--license", "78", "--user-id", "1"],
        &db_path,
    );
    let (after, _, _) = run_anchor(&["root"], &db_path);

    assert_ne!(json(&before)["doctors"], json(&after)["doctors"]);
    assert_eq!(json(&before)["prescriptions"], json(&after)["prescriptions"]);
}
