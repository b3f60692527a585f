use std::fs;
use std::process::Command;
use tempfile::TempDir;

use serial_test::serial;

fn media_isolation() -> Command {
    Command::new(env!("CARGO_BIN_EXE_media-isolation"))
}

/// Test that the CLI lists its commands
#[test]
#[serial]
fn test_help_lists_commands() {
    let output = media_isolation()
        .arg("--help")
        .output()
        .expect("Failed to execute help command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["scan", "encode", "version"] {
        assert!(stdout.contains(command), "Missing {command} in: {stdout}");
    }
}

/// Scanning a missing source fails before any worker is launched
#[test]
#[serial]
fn test_scan_missing_source_fails() {
    let temp_dir = TempDir::new().unwrap();
    let output = media_isolation()
        .args(["scan", temp_dir.path().join("missing.mkv").to_str().unwrap()])
        .env("WORKER_PATH", "/nonexistent/media-worker")
        .env("SETTINGS_PATH", temp_dir.path().join("settings.json"))
        .output()
        .expect("Failed to execute scan command");

    assert!(!output.status.success());
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Source does not exist"), "got: {text}");
}

/// A worker executable that cannot be started is reported as a command failure
#[test]
#[serial]
fn test_encode_with_missing_worker_fails() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("movie.mkv");
    fs::write(&source, "").unwrap();

    let job_file = temp_dir.path().join("job.json");
    let job = serde_json::json!({
        "Source": {"Path": source},
        "Destination": {"File": temp_dir.path().join("movie.mp4")}
    });
    fs::write(&job_file, job.to_string()).unwrap();

    let output = media_isolation()
        .args(["encode", job_file.to_str().unwrap()])
        .env("WORKER_PATH", "/nonexistent/media-worker")
        .env("PROCESS_ISOLATION", "true")
        .env("SETTINGS_PATH", temp_dir.path().join("settings.json"))
        .output()
        .expect("Failed to execute encode command");

    assert!(!output.status.success());
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("failed to start worker process"), "got: {text}");
}
