//! End-to-end tests for the syncwave binary

use std::process::Command;

use tempfile::TempDir;

fn syncwave() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_syncwave"));
    // Keep ambient SYNCWAVE_* overrides from leaking into assertions.
    for (key, _) in std::env::vars() {
        if key.starts_with("SYNCWAVE_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

#[test]
fn test_print_config_defaults() {
    let output = syncwave().arg("print-config").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("[transport]"));
    assert!(stdout.contains("mode = \"both\""));
    assert!(stdout.contains("snapshot_interval = 50"));
}

#[test]
fn test_print_config_reads_file_and_env() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("syncwave.toml");
    std::fs::write(
        &path,
        "[transport]\nmode = \"sse\"\n\n[event_store]\nsnapshot_interval = 7\n",
    )
    .unwrap();

    let output = syncwave()
        .arg("--config")
        .arg(&path)
        .arg("print-config")
        .env("SYNCWAVE_REPLAY_KEEP_SNAPSHOTS", "9")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("mode = \"sse\""));
    assert!(stdout.contains("snapshot_interval = 7"));
    assert!(stdout.contains("keep_snapshots = 9"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[replay]\ndefault_page_size = 0\n").unwrap();

    let output = syncwave()
        .arg("--config")
        .arg(&path)
        .arg("print-config")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("default_page_size"));
}

#[test]
fn test_unknown_transport_rejected() {
    let output = syncwave()
        .args(["serve", "--transport", "carrier-pigeon"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
