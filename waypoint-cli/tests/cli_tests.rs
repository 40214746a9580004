//! Tests driving the `waypoint` binary.

use std::path::Path;
use std::process::{Command, Output};

const DOCS: &str = r#"{"id": "eg-sahl", "text": "Quiet sandy beach with coral reefs.", "metadata": {"country": "Egypt", "category": "beach"}}
{"id": "jp-kyoto", "text": "Temples and gardens.", "metadata": {"country": "Japan", "category": "city"}}
"#;

fn waypoint(args: &[&str], cwd: &Path) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_waypoint"));
    command.args(args).current_dir(cwd).env_remove("RUST_LOG");
    for (key, _) in std::env::vars() {
        if key.starts_with("WAYPOINT_") || key == "GOOGLE_API_KEY" || key == "OPENAI_API_KEY" {
            command.env_remove(key);
        }
    }
    command.output().unwrap()
}

#[test]
fn missing_index_fails_without_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let output = waypoint(
        &["ask", "beach destinations in Egypt", "--index-dir", "does-not-exist", "--api-key", "k"],
        dir.path(),
    );

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error: index unavailable"), "stderr: {stderr}");
}

#[test]
fn empty_query_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("docs.jsonl"), DOCS).unwrap();
    assert!(waypoint(&["index", "--input", "docs.jsonl"], dir.path()).status.success());

    let output = waypoint(&["ask", "   ", "--strategy", "lexical", "--api-key", "k"], dir.path());
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.lines().count(), 1, "stderr: {stderr}");
    assert!(stderr.starts_with("Error: query must not be empty"), "stderr: {stderr}");
    assert!(!stderr.contains('\x1b'), "stderr: {stderr}");
}

#[test]
fn index_then_ask_against_unreachable_provider() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("docs.jsonl"), DOCS).unwrap();

    let built = waypoint(&["index", "--input", "docs.jsonl", "--metric", "l2"], dir.path());
    assert!(built.status.success(), "stderr: {}", String::from_utf8_lossy(&built.stderr));
    assert_eq!(String::from_utf8_lossy(&built.stdout), "indexed 2 documents (hashing/fnv1a-stemmed-v1, l2)");
    assert!(dir.path().join("index/manifest.json").exists());

    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let base_url = format!("http://127.0.0.1:{port}/v1beta");
    let output = waypoint(
        &[
            "ask",
            "beach destinations in Egypt",
            "--strategy",
            "hybrid",
            "--api-key",
            "k",
            "--base-url",
            &base_url,
            "--timeout-secs",
            "5",
        ],
        dir.path(),
    );

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error: generation unavailable"), "stderr: {stderr}");
    assert_eq!(stderr.lines().count(), 1, "stderr: {stderr}");
}

#[test]
fn missing_credential_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("docs.jsonl"), DOCS).unwrap();
    assert!(waypoint(&["index", "--input", "docs.jsonl"], dir.path()).status.success());

    let output = waypoint(&["ask", "beach"], dir.path());
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no API key"));
}
