use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn toxit_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("toxit");
    path
}

/// A port nothing listens on, so scoring fails fast and every score is null.
fn dead_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let snapshots = root.join("snapshots");
    fs::create_dir_all(&snapshots).unwrap();
    fs::write(
        snapshots.join("rust.json"),
        r#"{
  "key": "t5_rust",
  "moderators": ["ferris", "crab"],
  "posts": [
    {
      "comments": [
        {"body": "the borrow checker finally clicked for me", "author": "alice", "permalink": "/r/rust/1"},
        {"body": "too short", "author": "bob", "permalink": "/r/rust/2"},
        {"body": "deleted account comment with enough words", "author": null, "permalink": "/r/rust/3"}
      ]
    }
  ]
}"#,
    )
    .unwrap();
    fs::write(
        snapshots.join("golang.json"),
        r#"{
  "key": "t5_golang",
  "moderators": ["gopher", "crab"],
  "posts": [
    {
      "comments": [
        {"body": "goroutines make this kind of thing easy", "author": "alice", "permalink": "/r/golang/1"},
        {"body": "generics landed and nobody noticed anything", "author": "carol", "permalink": "/r/golang/2", "edited": true}
      ]
    }
  ]
}"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/toxit.sqlite"

[scoring]
url = "http://127.0.0.1:{}/predict"
batch_size = 2
timeout_secs = 2
backoff_ms = 0

[scheduler]
poll_interval_secs = 1

[collector]
root = "{}/snapshots"
"#,
        root.display(),
        dead_port(),
        root.display()
    );

    let config_path = config_dir.join("toxit.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_toxit(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = toxit_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run toxit binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn init(config_path: &Path) {
    let (_, stderr, success) = run_toxit(config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_toxit(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/toxit.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    init(&config_path);
    let (_, stderr, success) = run_toxit(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_task_add_and_list() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);

    let (stdout, stderr, success) = run_toxit(
        &config_path,
        &["task", "add", "rust", "golang", "--scope", "month", "--start", "2030-01-01 12:00"],
    );
    assert!(success, "task add failed: {}", stderr);
    assert!(stdout.contains("task 1 scheduled"));
    assert!(stdout.contains("2030-01-01"));

    let (stdout, _, success) = run_toxit(&config_path, &["task", "list"]);
    assert!(success);
    assert!(stdout.contains("scheduled"));
    assert!(stdout.contains("month"));
    assert!(stdout.contains("rust,golang"));
}

#[test]
fn test_task_list_empty() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);

    let (stdout, _, success) = run_toxit(&config_path, &["task", "list"]);
    assert!(success);
    assert!(stdout.contains("No tasks."));
}

#[test]
fn test_task_add_rejects_duplicate_communities() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);

    let (_, stderr, success) = run_toxit(&config_path, &["task", "add", "rust", "rust"]);
    assert!(!success);
    assert!(stderr.contains("rust"));
}

#[test]
fn test_task_add_rejects_unknown_scope() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);

    let (_, _, success) = run_toxit(&config_path, &["task", "add", "rust", "--scope", "decade"]);
    assert!(!success);
}

#[test]
fn test_task_cancel() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);
    run_toxit(&config_path, &["task", "add", "rust", "--start", "2030-01-01 12:00"]);

    let (stdout, stderr, success) = run_toxit(&config_path, &["task", "cancel", "1"]);
    assert!(success, "cancel failed: {}", stderr);
    assert!(stdout.contains("task 1 cancelled"));

    // Cancelling twice is refused
    let (_, stderr, success) = run_toxit(&config_path, &["task", "cancel", "1"]);
    assert!(!success);
    assert!(stderr.contains("cancelled"));

    let (stdout, _, _) = run_toxit(&config_path, &["task", "list"]);
    assert!(stdout.contains("cancelled"));
}

#[test]
fn test_task_cancel_missing() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);

    let (_, stderr, success) = run_toxit(&config_path, &["task", "cancel", "42"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_run_once_idle() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);

    let (stdout, stderr, success) = run_toxit(&config_path, &["run", "--once"]);
    assert!(success, "run failed: {}", stderr);
    assert!(stdout.contains("no due task"));
}

#[test]
fn test_run_once_completes_task_and_stats() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);
    let (_, stderr, success) = run_toxit(
        &config_path,
        &["task", "add", "rust", "golang", "--min-words", "3"],
    );
    assert!(success, "task add failed: {}", stderr);

    let (stdout, stderr, success) = run_toxit(&config_path, &["run", "--once"]);
    assert!(success, "run failed: {}", stderr);
    assert!(stdout.contains("task 1 completed"), "stdout: {}", stdout);

    let (stdout, stderr, success) = run_toxit(&config_path, &["stats", "1"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Task 1: completed"));
    assert!(stdout.contains("rust"));
    assert!(stdout.contains("golang"));
    // Nothing could be scored: 0 of 1 rust samples, 0 of 2 golang samples
    assert!(stdout.contains("0/1"));
    assert!(stdout.contains("0/2"));
    // Both share moderator "crab" and author "alice"
    assert!(stdout.contains("Moderator overlap (1 edges)"));
    assert!(stdout.contains("Author overlap (1 edges)"));
    assert!(stdout.contains("rust - golang  1"));
}

#[test]
fn test_run_once_missing_snapshot_marks_error() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);
    run_toxit(&config_path, &["task", "add", "rust", "nowhere"]);

    let (stdout, stderr, success) = run_toxit(&config_path, &["run", "--once"]);
    assert!(success, "run failed: {}", stderr);
    assert!(stdout.contains("task 1 error"));

    let (stdout, _, success) = run_toxit(&config_path, &["stats", "1"]);
    assert!(success);
    assert!(stdout.contains("no stored results"));
}

#[test]
fn test_stats_missing_task() {
    let (_tmp, config_path) = setup_test_env();
    init(&config_path);

    let (_, stderr, success) = run_toxit(&config_path, &["stats", "7"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_toxit(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
