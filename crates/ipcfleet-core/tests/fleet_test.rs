#![allow(clippy::unwrap_used)]
// Integration tests for `Fleet`: registry, catalog scans and live listeners
// against a wiremock device.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ipcfleet_api::rpc::media_file_find::FileInfo;
use ipcfleet_core::{
    ConnectionStatus, CoreError, DeviceConfig, FileSink, Fleet, FleetConfig, FleetEvent, LockError,
    ReconnectConfig, ScanRange, topics,
};

const SESSION: &str = "5a2b9c0d";

// ── Helpers ─────────────────────────────────────────────────────────

fn device(id: &str, url: &str) -> DeviceConfig {
    DeviceConfig {
        id: id.into(),
        name: String::new(),
        url: Url::parse(url).unwrap(),
        username: "admin".into(),
        password: "123".to_string().into(),
        timezone: chrono_tz::Europe::Berlin,
    }
}

fn fleet() -> (Fleet, CancellationToken) {
    let cancel = CancellationToken::new();
    let config = FleetConfig {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            max_retries: None,
        },
        ..FleetConfig::default()
    };
    (Fleet::new(config, cancel.clone()), cancel)
}

fn ok(params: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": 1,
        "session": SESSION,
        "result": true,
        "params": params,
    }))
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/RPC2_Login"))
        .and(body_partial_json(json!({ "params": { "password": "" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1,
            "session": 1_234_567,
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
        .respond_with(ok(Value::Null))
        .mount(server)
        .await;
}

async fn mount_rpc(server: &MockServer, rpc_method: &str, response: ResponseTemplate, expected: Option<u64>) {
    let mock = Mock::given(method("POST"))
        .and(path("/RPC2"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(response);
    match expected {
        Some(n) => mock.expect(n).mount(server).await,
        None => mock.mount(server).await,
    }
}

#[derive(Default)]
struct MemorySink {
    files: Mutex<Vec<(String, String)>>,
}

impl FileSink for MemorySink {
    async fn upsert(&self, device: &str, files: &[FileInfo]) -> Result<u64, CoreError> {
        let mut stored = self.files.lock().unwrap();
        for file in files {
            stored.push((device.to_owned(), file.file_path.clone()));
        }
        Ok(u64::try_from(files.len()).unwrap())
    }
}

// ── Registry ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_registry_lifecycle() {
    let (fleet, _cancel) = fleet();
    fleet.upsert(device("cam-2", "http://192.0.2.2")).await;
    fleet.upsert(device("cam-1", "http://192.0.2.1")).await;

    assert_eq!(fleet.ids(), vec!["cam-1", "cam-2"]);
    assert_eq!(fleet.devices()[0].display_name(), "cam-1");

    let first = fleet.get("cam-1").unwrap();
    let again = fleet.get("cam-1").unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &again));
    assert_eq!(first.cgi().base_url().as_str(), "http://192.0.2.1/cgi-bin/");

    // Same config keeps the cached client; a changed one replaces it.
    fleet.upsert(device("cam-1", "http://192.0.2.1")).await;
    assert!(std::sync::Arc::ptr_eq(&first, &fleet.get("cam-1").unwrap()));
    fleet.upsert(device("cam-1", "http://192.0.2.9")).await;
    assert!(!std::sync::Arc::ptr_eq(&first, &fleet.get("cam-1").unwrap()));

    assert!(fleet.remove("cam-2").await);
    assert!(!fleet.remove("cam-2").await);
    assert!(matches!(
        fleet.get("cam-2"),
        Err(CoreError::DeviceNotFound { id }) if id == "cam-2"
    ));
}

// ── Scans ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_scan_pages_every_window_into_sink() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_rpc(
        &server,
        "mediaFileFind.factory.create",
        ResponseTemplate::new(200).set_body_json(json!({ "id": 2, "result": 41 })),
        Some(4),
    )
    .await;
    mount_rpc(&server, "mediaFileFind.findFile", ok(Value::Null), Some(4)).await;
    mount_rpc(
        &server,
        "mediaFileFind.findNextFile",
        ok(json!({
            "found": 1,
            "infos": [{ "Channel": 0, "Type": "dav", "FilePath": "/mnt/sd/a.dav",
                        "StartTime": "2024-01-02 10:00:00", "EndTime": "2024-01-02 10:30:00" }],
        })),
        Some(4),
    )
    .await;
    mount_rpc(&server, "mediaFileFind.close", ok(Value::Null), Some(4)).await;
    mount_rpc(&server, "mediaFileFind.destroy", ok(Value::Null), Some(4)).await;

    let (fleet, cancel) = fleet();
    fleet.upsert(device("cam-1", &server.uri())).await;
    let mut progress = fleet
        .bus()
        .subscribe_channel(&cancel, [topics::SCAN_PROGRESS], 8)
        .await
        .unwrap();

    // 45 days: one full window and one partial, pictures then videos each.
    let range = ScanRange::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap(),
    )
    .unwrap();
    let sink = MemorySink::default();
    let summary = fleet.scan("cam-1", range, &sink, &cancel).await.unwrap();

    assert_eq!(summary.periods, 2);
    assert_eq!(summary.files, 4);
    assert_eq!(sink.files.lock().unwrap().len(), 4);
    assert!(!fleet.locks().is_locked(&"cam-1".to_string()));

    let mut percents = Vec::new();
    for _ in 0..2 {
        match &*progress.recv().await.unwrap() {
            FleetEvent::ScanProgress { percent, .. } => percents.push(*percent),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!((percents[0] - 200.0 / 3.0).abs() < 1e-6);
    assert!((percents[1] - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_scan_refuses_locked_device() {
    let (fleet, cancel) = fleet();
    fleet.upsert(device("cam-1", "http://192.0.2.1")).await;
    let range = ScanRange::new(Utc::now() - chrono::TimeDelta::days(1), Utc::now()).unwrap();

    let held = fleet.locks().try_lock("cam-1".to_string()).unwrap();
    let err = fleet
        .scan("cam-1", range, &MemorySink::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Lock(LockError::ResourceLocked { .. })));
    assert!(err.is_transient());
    drop(held);
}

#[tokio::test]
async fn test_cancelled_scan_releases_lock() {
    let (fleet, _) = fleet();
    fleet.upsert(device("cam-1", "http://192.0.2.1")).await;
    let range = ScanRange::new(Utc::now() - chrono::TimeDelta::days(1), Utc::now()).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = fleet
        .scan("cam-1", range, &MemorySink::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
    assert!(!fleet.locks().is_locked(&"cam-1".to_string()));
}

// ── Listener ────────────────────────────────────────────────────────

const EVENTS: &str = "--myboundary\r
Content-Type: text/plain\r
Content-Length: 37\r
\r
Code=VideoMotion;action=Start;index=0\r
\r
--myboundary\r
Content-Type: text/plain\r
Content-Length: 36\r
\r
Code=VideoMotion;action=Stop;index=0\r
\r
";

fn status_of(event: &FleetEvent) -> Option<ConnectionStatus> {
    match event {
        FleetEvent::Connection { status, .. } => Some(*status),
        _ => None,
    }
}

#[tokio::test]
async fn test_listener_republishes_feed_and_reattaches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/eventManager.cgi"))
        .and(query_param("action", "attach"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "multipart/x-mixed-replace; boundary=myboundary")
                .set_body_string(EVENTS),
        )
        .mount(&server)
        .await;

    let (fleet, cancel) = fleet();
    fleet.upsert(device("cam-1", &server.uri())).await;
    let mut sub = fleet.bus().subscribe_channel(&cancel, topics::ALL, 32).await.unwrap();

    fleet.listen("cam-1").unwrap();
    assert!(fleet.is_listening("cam-1"));

    let mut seen = Vec::new();
    while seen.len() < 6 {
        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.device(), "cam-1");
        seen.push(event);
    }

    assert_eq!(status_of(&seen[0]), Some(ConnectionStatus::Connecting));
    assert_eq!(status_of(&seen[1]), Some(ConnectionStatus::Connected));
    let actions: Vec<&str> = seen[2..4]
        .iter()
        .map(|e| match &**e {
            FleetEvent::Camera { event, .. } => event.action.as_str(),
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(actions, vec!["Start", "Stop"]);
    assert_eq!(status_of(&seen[4]), Some(ConnectionStatus::Disconnected));
    // Clean end of feed, so the listener attaches again.
    assert_eq!(status_of(&seen[5]), Some(ConnectionStatus::Connecting));

    assert!(fleet.stop_listener("cam-1").await);
    assert!(!fleet.is_listening("cam-1"));
    fleet.shutdown().await;
    assert!(fleet.bus().is_closed());
}

#[tokio::test]
async fn test_listener_reports_attach_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/eventManager.cgi"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (fleet, cancel) = fleet();
    fleet.upsert(device("cam-1", &server.uri())).await;
    let mut sub = fleet
        .bus()
        .subscribe_channel(&cancel, [topics::DEVICE_CONNECTION], 8)
        .await
        .unwrap();
    fleet.listen("cam-1").unwrap();

    let connecting = sub.recv().await.unwrap();
    assert_eq!(status_of(&connecting), Some(ConnectionStatus::Connecting));
    match &*sub.recv().await.unwrap() {
        FleetEvent::Connection { status, error, .. } => {
            assert_eq!(*status, ConnectionStatus::Disconnected);
            assert!(error.is_some());
        }
        other => panic!("unexpected event {other:?}"),
    }

    cancel.cancel();
}
