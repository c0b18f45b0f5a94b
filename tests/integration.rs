use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ksync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ksync");
    path
}

fn write_config(root: &Path, extra: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ksync.sqlite"

[sources.confluence]
base_url = "https://acme.atlassian.net"
email = "bot@acme.com"
space_key = "TEAM"

[destination]
api_url = "http://127.0.0.1:9/v1"
dataset_id = "ds-test"
{}
"#,
        root.display(),
        extra
    );

    let config_path = config_dir.join("ksync.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), "");
    (tmp, config_path)
}

fn run_ksync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ksync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("ATLASSIAN_API_TOKEN")
        .env_remove("DIFY_API_KEY")
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ksync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ksync(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/ksync.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_ksync(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ksync(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_status_on_empty_ledger() {
    let (_tmp, config_path) = setup_test_env();

    run_ksync(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ksync(&config_path, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("SYNCED"));
    assert!(stdout.contains("issue"));
    assert!(stdout.contains("page"));
    assert!(!stdout.contains("Failed permanently"));
}

#[test]
fn test_status_rejects_unknown_filter() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_ksync(&config_path, &["status", "--status", "archived"]);
    assert!(!success);
    assert!(stderr.contains("archived"), "stderr: {}", stderr);
}

#[test]
fn test_sources_lists_configuration() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_ksync(&config_path, &["sources"]);
    assert!(success);
    let jira_line = stdout.lines().find(|l| l.starts_with("jira")).unwrap();
    assert!(jira_line.contains("NOT CONFIGURED"));
    let confluence_line = stdout.lines().find(|l| l.starts_with("confluence")).unwrap();
    assert!(confluence_line.contains("NO TOKEN"));
    assert!(confluence_line.contains("space TEAM"));
    assert!(stdout.contains("dataset ds-test"));
}

#[test]
fn test_sync_unconfigured_source_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_ksync(&config_path, &["sync", "issue"]);
    assert!(!success);
    assert!(stderr.contains("No Jira source configured"), "stderr: {}", stderr);
}

#[test]
fn test_sync_requires_token() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_ksync(&config_path, &["sync", "all"]);
    assert!(!success);
    assert!(stderr.contains("ATLASSIAN_API_TOKEN"), "stderr: {}", stderr);
}

#[test]
fn test_sync_unknown_target() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_ksync(&config_path, &["sync", "wiki"]);
    assert!(!success);
    assert!(stderr.contains("issue, page, all"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), "\n[sync]\nfailure_ceiling = 0\n");

    let (_, stderr, success) = run_ksync(&config_path, &["status"]);
    assert!(!success);
    assert!(stderr.contains("failure_ceiling"), "stderr: {}", stderr);
}

#[test]
fn test_template_values_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), "");
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("ds-test", "your-dataset-id");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_ksync(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("destination.dataset_id"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_ksync(&tmp.path().join("nope.toml"), &["status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}

#[test]
fn test_requeue_unknown_item_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_ksync(&config_path, &["init"]);
    let (_, stderr, success) = run_ksync(&config_path, &["requeue", "issue", "PROJ-404"]);
    assert!(!success);
    assert!(stderr.contains("No tracked issue"), "stderr: {}", stderr);
}

#[tokio::test]
async fn test_requeue_parked_item() {
    let (tmp, config_path) = setup_test_env();
    run_ksync(&config_path, &["init"]);

    let pool = sqlx::SqlitePool::connect(&format!(
        "sqlite:{}",
        tmp.path().join("data/ksync.sqlite").display()
    ))
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO tracked_items (source_type, source_id, last_attempt_at, status, failure_count, last_error) \
         VALUES ('page', '4242', 0, 'failed_permanent', 5, 'permanent dispatch failure: 400')",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let (stdout, _, _) = run_ksync(&config_path, &["status"]);
    assert!(stdout.contains("Failed permanently"));
    assert!(stdout.contains("page:4242"));

    let (stdout, stderr, success) = run_ksync(&config_path, &["requeue", "page", "4242"]);
    assert!(success, "requeue failed: {}", stderr);
    assert!(stdout.contains("requeued page:4242"));

    let (stdout, _, success) =
        run_ksync(&config_path, &["status", "--status", "pending_retry"]);
    assert!(success);
    assert!(stdout.contains("4242"));
    assert!(stdout.contains("1 item(s)"));

    let (_, stderr, success) = run_ksync(&config_path, &["requeue", "page", "4242"]);
    assert!(!success);
    assert!(stderr.contains("only failed_permanent"), "stderr: {}", stderr);
}

#[test]
fn test_completions() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, success) = run_ksync(&tmp.path().join("unused.toml"), &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("ksync"));
}

#[test]
fn test_serve_accepts_schedule_flag() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, success) = run_ksync(&tmp.path().join("unused.toml"), &["serve", "--help"]);
    assert!(success);
    assert!(stdout.contains("--schedule"), "stdout: {}", stdout);
}
