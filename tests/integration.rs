use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ocrawl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ocrawl");
    path
}

const CREDENTIAL_VARS: [&str; 3] = ["CHANNEL_API_ID", "CHANNEL_API_HASH", "CHANNEL_PHONE_NUMBER"];

fn write_config(root: &Path, crawl_section: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ocrawl.sqlite"

{}

[channel]
endpoint = "http://127.0.0.1:9"
timeout_secs = 1
"#,
        root.display(),
        crawl_section
    );

    let config_path = config_dir.join("ocrawl.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let crawl_section = format!(
        r#"[crawl]
check_history_offset_ms = 43200000
supported_filetypes = ["csv", "sql", "txt"]
root_path = "{}"
log_level = "info""#,
        tmp.path().display()
    );
    let config_path = write_config(tmp.path(), &crawl_section);
    (tmp, config_path)
}

/// Runs the binary from inside the temp dir with no channel credentials,
/// so neither the host environment nor a stray `.env` leaks in.
fn run_ocrawl(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ocrawl_binary();
    let workdir = config_path.parent().unwrap().parent().unwrap();

    let mut command = Command::new(&binary);
    command
        .current_dir(workdir)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args);
    for var in CREDENTIAL_VARS {
        command.env_remove(var);
    }

    let output = command
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ocrawl binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ocrawl(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/ocrawl.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_ocrawl(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ocrawl(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_origins_empty_after_init() {
    let (_tmp, config_path) = setup_test_env();

    run_ocrawl(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ocrawl(&config_path, &["origins"]);
    assert!(success, "origins failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("DOMAIN"));
    assert!(stdout.contains("0 origin(s) tracked"));
}

#[test]
fn test_missing_mandatory_setting_is_rejected() {
    let tmp = TempDir::new().unwrap();
    // No log_level
    let crawl_section = format!(
        r#"[crawl]
check_history_offset_ms = 43200000
supported_filetypes = ["csv"]
root_path = "{}""#,
        tmp.path().display()
    );
    let config_path = write_config(tmp.path(), &crawl_section);

    let (_, stderr, success) = run_ocrawl(&config_path, &["init"]);
    assert!(!success, "init should fail without log_level");
    assert!(stderr.contains("log_level"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_setting_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let crawl_section = format!(
        r#"[crawl]
check_history_offset_ms = 43200000
supported_filetypes = []
root_path = "{}"
log_level = "info""#,
        tmp.path().display()
    );
    let config_path = write_config(tmp.path(), &crawl_section);

    let (_, stderr, success) = run_ocrawl(&config_path, &["init"]);
    assert!(!success, "init should fail with no supported file types");
    assert!(stderr.contains("supported_filetypes"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_file_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("config/absent.toml");

    let (_, stderr, success) = run_ocrawl(&config_path, &["origins"]);
    assert!(!success);
    assert!(stderr.contains("absent.toml"), "stderr: {}", stderr);
}

#[test]
fn test_crawl_refuses_to_start_without_credentials() {
    let (_tmp, config_path) = setup_test_env();

    run_ocrawl(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ocrawl(&config_path, &["crawl"]);
    assert!(!success, "crawl should fail: stdout={}", stdout);
    assert!(
        stderr.contains("channel client"),
        "stderr should explain the channel failure: {}",
        stderr
    );
}

#[test]
fn test_add_origin_refuses_without_credentials() {
    let (_tmp, config_path) = setup_test_env();

    run_ocrawl(&config_path, &["init"]);
    let (_, _, success) = run_ocrawl(&config_path, &["add-origin", "-1001234567890"]);
    assert!(!success);

    let (stdout, _, _) = run_ocrawl(&config_path, &["origins"]);
    assert!(stdout.contains("0 origin(s) tracked"));
}
