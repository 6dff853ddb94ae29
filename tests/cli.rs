//! CLI test cases.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("docscribe").unwrap()
}

/// Point every scratch-producing flag at fresh subdirectories of `dir`, so
/// parallel test runs never share a `prompts/`/`cache/` directory.
fn scratch_flags(dir: &std::path::Path) -> Vec<String> {
    vec![
        "--prompts-dir".to_string(),
        dir.join("prompts").display().to_string(),
        "--cache-dir".to_string(),
        dir.join("cache").display().to_string(),
    ]
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_ocr_short_circuits_when_already_tagged_complete() {
    let dir = tempfile::tempdir().unwrap();
    let output = cmd()
        .arg("ocr")
        .args(scratch_flags(dir.path()))
        .arg("--content")
        .arg("already extracted")
        .arg("--tag")
        .arg("OCR-complete")
        .arg("--ocr-complete-tag")
        .arg("OCR-complete")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["text"], "already extracted");
    assert_eq!(parsed["processed_pages"], 0);
}

#[test]
fn test_enrich_prints_a_suggestion() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .arg("enrich")
        .arg("--prompts-dir")
        .arg(dir.path().join("prompts"))
        .arg("--title")
        .arg("Electric Bill")
        .arg("--content")
        .arg("Your March electric bill is due April 1st. Amount: $84.20.")
        .assert()
        .success()
        .stdout(predicate::str::contains("document_id"));
}

#[test]
fn test_enrich_apply_returns_the_updated_document() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .arg("enrich")
        .arg("--prompts-dir")
        .arg(dir.path().join("prompts"))
        .arg("--title")
        .arg("Electric Bill")
        .arg("--content")
        .arg("Your March electric bill is due April 1st.")
        .arg("--apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id\""));
}

#[test]
fn test_jobs_submits_and_waits_for_a_terminal_status() {
    let dir = tempfile::tempdir().unwrap();
    let output = cmd()
        .arg("jobs")
        .args(scratch_flags(dir.path()))
        .arg("--content")
        .arg("some scanned text")
        .arg("--timeout-secs")
        .arg("20")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let status = parsed["status"].as_str().unwrap();
    assert!(
        matches!(status, "completed" | "failed"),
        "expected a terminal status, got {status:?}"
    );
}

#[test]
fn test_history_list_against_a_fresh_database_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("history.db");
    let output = cmd()
        .arg("history")
        .arg("--history-db")
        .arg(&db)
        .arg("list")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 0);
    assert!(db.exists(), "connecting should create the database file");
}

#[test]
fn test_history_undo_of_an_unknown_row_fails() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .arg("history")
        .arg("--history-db")
        .arg(dir.path().join("history.db"))
        .arg("undo")
        .arg("999")
        .assert()
        .failure();
}
