//! Integration tests for the `ipcfleet` CLI binary.
//!
//! Argument parsing, help output, config handling and error exit codes, plus
//! an RPC call and a snapshot against a wiremock device.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `ipcfleet` binary with env isolation.
///
/// Clears `IPCFLEET_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn ipcfleet_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("ipcfleet");
    cmd.env("HOME", "/tmp/ipcfleet-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/ipcfleet-cli-test-nonexistent")
        .env_remove("IPCFLEET_CONFIG")
        .env_remove("IPCFLEET_FORMAT")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

const TWO_DEVICES: &str = r#"
[[devices]]
id = "front-door"
name = "Front door"
url = "http://192.0.2.10"
password = "hunter2"
timezone = "Europe/Berlin"

[[devices]]
id = "garage"
url = "http://192.0.2.11"
"#;

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = ipcfleet_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    ipcfleet_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("IP cameras")
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("events"))
            .and(predicate::str::contains("scan")),
    );
}

#[test]
fn test_version_flag() {
    ipcfleet_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ipcfleet"));
}

#[test]
fn test_snapshot_requires_output() {
    let output = ipcfleet_cmd().args(["snapshot", "garage"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("--output"));
}

// ── Devices ─────────────────────────────────────────────────────────

#[test]
fn test_devices_without_config_is_empty() {
    ipcfleet_cmd()
        .args(["devices", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_devices_lists_config_without_passwords() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), TWO_DEVICES);

    let output = ipcfleet_cmd()
        .arg("--config")
        .arg(&config)
        .args(["devices", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let listed: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listed[0]["id"], "front-door");
    assert_eq!(listed[0]["timezone"], "Europe/Berlin");
    assert_eq!(listed[1]["username"], "admin");
    assert!(!String::from_utf8_lossy(&output.stdout).contains("hunter2"));
}

#[test]
fn test_devices_plain_prints_ids() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), TWO_DEVICES);

    ipcfleet_cmd()
        .arg("--config")
        .arg(&config)
        .args(["devices", "-f", "plain"])
        .assert()
        .success()
        .stdout("front-door\ngarage\n");
}

#[test]
fn test_duplicate_ids_are_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[devices]]
id = "cam"
url = "http://192.0.2.1"

[[devices]]
id = "cam"
url = "http://192.0.2.2"
"#,
    );

    let output = ipcfleet_cmd().arg("--config").arg(&config).arg("devices").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("duplicate id"));
}

// ── Error exit codes ────────────────────────────────────────────────

#[test]
fn test_unknown_device_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), TWO_DEVICES);

    let output = ipcfleet_cmd()
        .arg("--config")
        .arg(&config)
        .args(["rpc", "attic", "magicBox.getSerialNo"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("attic"));
}

#[test]
fn test_missing_password_is_auth_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), TWO_DEVICES);

    let output = ipcfleet_cmd()
        .arg("--config")
        .arg(&config)
        .args(["rpc", "garage", "magicBox.getSerialNo"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("garage"));
}

#[test]
fn test_backwards_scan_range_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), TWO_DEVICES);

    let output = ipcfleet_cmd()
        .arg("--config")
        .arg(&config)
        .args(["scan", "front-door", "--start", "2024-02-01", "--end", "2024-01-01"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Against a device ────────────────────────────────────────────────

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/RPC2_Login"))
        .and(body_partial_json(json!({ "params": { "password": "" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "session": "5a2b9c0d",
            "result": false,
            "error": { "code": 268_632_079, "message": "Component error: login challenge!" },
            "params": {
                "encryption": "Default",
                "random": "1172275829",
                "realm": "Login to a0c50bcd05b2f03d067e530d9bf069af",
            },
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/RPC2_Login"))
        .and(body_partial_json(json!({ "params": { "authorityType": "Default" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 2,
            "session": "5a2b9c0d",
            "result": true,
        })))
        .mount(server)
        .await;
}

fn device_config(server: &MockServer) -> String {
    format!(
        "[[devices]]\nid = \"cam-1\"\nurl = \"{}\"\npassword = \"123\"\n",
        server.uri()
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rpc_prints_params() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/RPC2"))
        .and(body_partial_json(json!({
            "method": "magicBox.getSerialNo",
            "session": "5a2b9c0d",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 3,
            "session": "5a2b9c0d",
            "result": true,
            "params": { "sn": "4M01234PAZ12345" },
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/RPC2"))
        .and(body_partial_json(json!({ "method": "global.logout" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 4, "result": true })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &device_config(&server));

    let output = tokio::task::spawn_blocking(move || {
        ipcfleet_cmd()
            .arg("--config")
            .arg(&config)
            .args(["rpc", "cam-1", "magicBox.getSerialNo", "-f", "json-compact"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    let printed: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(printed["result"], 1);
    assert_eq!(printed["params"]["sn"], "4M01234PAZ12345");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_snapshot_writes_file() {
    let server = MockServer::start().await;
    let jpeg: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];
    Mock::given(method("GET"))
        .and(path("/cgi-bin/snapshot.cgi"))
        .and(query_param("channel", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "image/jpeg")
                .set_body_bytes(jpeg),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &device_config(&server));
    let target = dir.path().join("shot.jpg");

    let cmd_target = target.clone();
    let output = tokio::task::spawn_blocking(move || {
        ipcfleet_cmd()
            .arg("--config")
            .arg(&config)
            .args(["snapshot", "cam-1", "--channel", "2", "--output"])
            .arg(&cmd_target)
            .args(["-f", "plain"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(std::fs::read(&target).unwrap(), jpeg);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_download_writes_recorded_file() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/RPC_Loadfile/mnt/sd/2024-01-05/001/jpg/08/15/30.jpg"))
        .and(header_regex("cookie", "WebClientSessionID=5a2b9c0d"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "image/jpeg")
                .set_body_bytes(b"recorded".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/RPC2"))
        .and(body_partial_json(json!({ "method": "global.logout" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 4, "result": true })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &device_config(&server));
    let target = dir.path().join("clip.jpg");

    let cmd_target = target.clone();
    let output = tokio::task::spawn_blocking(move || {
        ipcfleet_cmd()
            .arg("--config")
            .arg(&config)
            .args(["download", "cam-1", "/mnt/sd/2024-01-05/001/jpg/08/15/30.jpg", "-o"])
            .arg(&cmd_target)
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(std::fs::read(&target).unwrap(), b"recorded");
}

#[test]
fn test_download_rejects_relative_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), TWO_DEVICES);

    let output = ipcfleet_cmd()
        .arg("--config")
        .arg(&config)
        .args(["download", "front-door", "mnt/sd/a.jpg", "-o"])
        .arg(dir.path().join("a.jpg"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(!dir.path().join("a.jpg").exists());
}
