//! Drives the built `aprbot` binary with a scrubbed environment.

use std::path::Path;
use std::process::{Command, Output};

fn aprbot(args: &[&str], envs: &[(&str, &str)], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_aprbot"))
        .args(args)
        .env_clear()
        .envs(envs.iter().copied())
        .current_dir(cwd)
        .output()
        .unwrap()
}

#[test]
fn inspect_prints_the_interpreted_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("pipeline_results.json");
    std::fs::write(
        &results,
        r#"{
          "validation_results": [
            {"patch_id": "p1", "compilation_success": true, "tests_passed": true},
            {"patch_id": "p2", "compilation_success": true, "tests_passed": true}
          ],
          "patch_candidates": [
            {"patch_id": "p1", "file_path": "a.c", "start_line": 10, "modified_code": "x"},
            {"patch_id": "p2", "file_path": "b.c", "start_line": 3, "modified_code": "y"}
          ]
        }"#,
    )
    .unwrap();

    let output = aprbot(
        &["inspect", "--results", results.to_str().unwrap(), "--max-patches", "1"],
        &[],
        dir.path(),
    );
    assert!(output.status.success());
    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["patches"].as_array().unwrap().len(), 1);
}

#[test]
fn inspect_reports_missing_results_as_unsuccessful() {
    let dir = tempfile::tempdir().unwrap();
    let output = aprbot(&["inspect", "--results", "nope.json"], &[], dir.path());
    assert!(output.status.success());
    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["success"], false);
    assert_eq!(outcome["failure"]["stage"], "parsing");
}

#[test]
fn locate_engine_prefers_configured_paths() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let engine = dir.path().join("apr_system");
    std::fs::write(&engine, "#!/bin/sh\n").unwrap();
    std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();

    let output = aprbot(
        &["locate-engine"],
        &[("APR_BINARY_PATHS", engine.to_str().unwrap())],
        dir.path(),
    );
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        engine.display().to_string()
    );
}

#[test]
fn repair_without_configuration_fails_with_a_hint() {
    let dir = tempfile::tempdir().unwrap();
    let event = dir.path().join("event.json");
    std::fs::write(
        &event,
        r#"{"installationId": 5, "repository": {"owner": "octo", "name": "widgets"},
            "workflowName": "CI", "headSha": "0123456789abcdef0123456789abcdef01234567",
            "headBranch": "main"}"#,
    )
    .unwrap();

    let output = aprbot(&["repair", "--event", event.to_str().unwrap()], &[], dir.path());
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("APP_ID"));
    assert!(stderr.contains("hint:"));
    assert!(output.stdout.is_empty());
}
