//! Integration tests for `lumen serve`.
//!
//! Each test starts the server as a child process on a unique port and
//! talks to it over raw TCP: plain HTTP/1.1 for the admin API and a
//! hand-framed WebSocket for the device protocol.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use serde_json::{json, Value};

/// Base port is derived from the process ID so parallel test binaries don't
/// collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 30000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// Kills the server when the test ends, pass or fail.
struct Server {
    child: Child,
    port: u16,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.child.kill().ok();
        self.child.wait().ok();
    }
}

fn start_server(args: &[&str], env: &[(&str, &str)]) -> Server {
    let port = next_port();
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_lumen"));
    cmd.arg("serve")
        .arg("--port")
        .arg(port.to_string())
        .arg("--bind")
        .arg("127.0.0.1")
        .args(args);
    for key in [
        "LUMEN_PORT",
        "LUMEN_BIND",
        "LUMEN_API_KEY",
        "LUMEN_RATE_LIMIT",
        "LUMEN_CHILDREN",
    ] {
        cmd.env_remove(key);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());

    let child = cmd.spawn().expect("failed to start lumen serve");
    for _ in 0..50 {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server { child, port }
}

// ──────────────────────────────────────────────
// HTTP helpers
// ──────────────────────────────────────────────

fn http_request(
    port: u16,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<&str>,
) -> (u16, Value) {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let mut request = format!("{method} {path} HTTP/1.1\r\nHost: localhost:{port}\r\n");
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    let body = body.unwrap_or("");
    if !body.is_empty() {
        request.push_str("Content-Type: application/json\r\n");
    }
    request.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    ));
    stream.write_all(request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);
    parse_http_response(&response)
}

fn get(port: u16, path: &str) -> (u16, Value) {
    http_request(port, "GET", path, &[], None)
}

fn post(port: u16, path: &str, body: Value) -> (u16, Value) {
    http_request(port, "POST", path, &[], Some(&body.to_string()))
}

/// Parse an HTTP response into (status_code, JSON body). Non-JSON bodies
/// come back as `Value::Null`.
fn parse_http_response(response: &str) -> (u16, Value) {
    let (headers, body) = response.split_once("\r\n\r\n").unwrap_or((response, ""));
    let status = headers
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    let body = if headers
        .to_ascii_lowercase()
        .contains("transfer-encoding: chunked")
    {
        decode_chunked(body)
    } else {
        body.to_string()
    };
    (status, serde_json::from_str(&body).unwrap_or(Value::Null))
}

fn decode_chunked(mut remaining: &str) -> String {
    let mut result = String::new();
    while let Some(line_end) = remaining.find("\r\n") {
        let size = match usize::from_str_radix(remaining[..line_end].trim(), 16) {
            Ok(0) | Err(_) => break,
            Ok(size) => size,
        };
        let start = line_end + 2;
        let end = (start + size).min(remaining.len());
        result.push_str(&remaining[start..end]);
        remaining = remaining.get(end + 2..).unwrap_or("");
    }
    result
}

// ──────────────────────────────────────────────
// WebSocket helpers
// ──────────────────────────────────────────────

struct WsClient {
    stream: TcpStream,
}

impl WsClient {
    fn connect(port: u16) -> Self {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("failed to connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let handshake = format!(
            "GET /ws HTTP/1.1\r\nHost: localhost:{port}\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n"
        );
        stream.write_all(handshake.as_bytes()).unwrap();

        // Read the response head byte by byte so no frame bytes are consumed.
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).expect("handshake response");
            head.push(byte[0]);
        }
        let head = String::from_utf8_lossy(&head);
        assert!(head.starts_with("HTTP/1.1 101"), "upgrade refused: {head}");
        Self { stream }
    }

    /// Send one masked text frame. The zero mask leaves the payload as is.
    fn send(&mut self, event: Value) {
        let payload = event.to_string().into_bytes();
        let mut frame = vec![0x81];
        match payload.len() {
            len if len < 126 => frame.push(0x80 | len as u8),
            len => {
                frame.push(0x80 | 126);
                frame.extend_from_slice(&(len as u16).to_be_bytes());
            }
        }
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.extend_from_slice(&payload);
        self.stream.write_all(&frame).unwrap();
    }

    /// Next text frame as JSON.
    fn recv(&mut self) -> Value {
        loop {
            let mut header = [0u8; 2];
            self.stream.read_exact(&mut header).expect("frame header");
            let opcode = header[0] & 0x0f;
            let len = match header[1] & 0x7f {
                126 => {
                    let mut ext = [0u8; 2];
                    self.stream.read_exact(&mut ext).unwrap();
                    u16::from_be_bytes(ext) as usize
                }
                127 => {
                    let mut ext = [0u8; 8];
                    self.stream.read_exact(&mut ext).unwrap();
                    u64::from_be_bytes(ext) as usize
                }
                len => len as usize,
            };
            let mut payload = vec![0u8; len];
            self.stream.read_exact(&mut payload).unwrap();
            if opcode == 0x1 {
                return serde_json::from_slice(&payload).expect("JSON text frame");
            }
        }
    }
}

// ──────────────────────────────────────────────
// Admin API
// ──────────────────────────────────────────────

#[test]
fn health_returns_ok_with_version() {
    let server = start_server(&[], &[]);
    let (status, body) = get(server.port, "/health");

    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[test]
fn unknown_route_is_json_404() {
    let server = start_server(&[], &[]);
    let (status, body) = get(server.port, "/nope");

    assert_eq!(status, 404);
    assert_eq!(body["error"], "not found");
}

#[test]
fn fresh_child_has_no_devices_or_progress() {
    let server = start_server(&[], &[]);

    let (status, body) = get(server.port, "/children/child-1/devices");
    assert_eq!(status, 200);
    assert_eq!(body, json!({"childId": "child-1", "connectedDevices": 0}));

    let (status, body) = get(server.port, "/children/child-1/progress");
    assert_eq!(status, 200);
    assert_eq!(body["snapshot"], json!([]));
}

#[test]
fn offline_queue_accepts_valid_updates_only() {
    let server = start_server(&[], &[]);
    let update = json!({
        "childId": "child-1",
        "activityId": "math-1",
        "progress": 40,
        "timestamp": 1000,
        "deviceId": "tablet",
        "sessionId": "s1"
    });

    let (status, body) = post(server.port, "/devices/tablet/offline-queue", update.clone());
    assert_eq!(status, 202);
    assert_eq!(body["queued"], 1);

    let (status, body) = post(server.port, "/devices/tablet/offline-queue", update);
    assert_eq!(status, 202);
    assert_eq!(body["queued"], 2);

    let invalid = json!({
        "childId": "child-1",
        "activityId": "",
        "progress": 40,
        "timestamp": 1000,
        "deviceId": "tablet"
    });
    let (status, body) = post(server.port, "/devices/tablet/offline-queue", invalid);
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("activityId"));
}

#[test]
fn backup_create_and_restore() {
    let server = start_server(&[], &[]);

    let (status, body) = post(server.port, "/children/child-1/backups", json!({}));
    assert_eq!(status, 201);
    let backup_id = body["backupId"].as_str().expect("backupId").to_string();
    assert!(backup_id.starts_with("backup_child-1_"));

    let (status, body) = post(
        server.port,
        &format!("/children/child-1/backups/{backup_id}/restore"),
        json!({}),
    );
    assert_eq!(status, 200);
    assert_eq!(body["restored"], true);
}

#[test]
fn restoring_missing_backup_is_404() {
    let server = start_server(&[], &[]);
    let (status, body) = post(
        server.port,
        "/children/child-1/backups/backup_child-1_0/restore",
        json!({}),
    );

    assert_eq!(status, 404);
    assert_eq!(body["restored"], false);
}

#[test]
fn broadcast_with_no_devices_reaches_nobody() {
    let server = start_server(&[], &[]);
    let (status, body) = post(
        server.port,
        "/children/child-1/broadcast",
        json!({"message": "hello"}),
    );

    assert_eq!(status, 200);
    assert_eq!(body["delivered"], 0);
}

#[test]
fn api_key_guards_admin_routes() {
    let server = start_server(&[], &[("LUMEN_API_KEY", "s3cret")]);

    let (status, _) = get(server.port, "/health");
    assert_eq!(status, 200, "/health is exempt");

    let (status, body) = get(server.port, "/children/child-1/devices");
    assert_eq!(status, 401);
    assert_eq!(body["error"], "authentication required");

    let (status, _) = http_request(
        server.port,
        "GET",
        "/children/child-1/devices",
        &[("X-API-Key", "wrong")],
        None,
    );
    assert_eq!(status, 403);

    let (status, body) = http_request(
        server.port,
        "GET",
        "/children/child-1/devices",
        &[("Authorization", "Bearer s3cret")],
        None,
    );
    assert_eq!(status, 200);
    assert_eq!(body["connectedDevices"], 0);
}

#[test]
fn rate_limit_rejects_excess_requests() {
    let server = start_server(&[], &[("LUMEN_RATE_LIMIT", "2")]);

    assert_eq!(get(server.port, "/health").0, 200);
    assert_eq!(get(server.port, "/health").0, 200);
    let (status, body) = get(server.port, "/health");
    assert_eq!(status, 429);
    assert_eq!(body["error"], "rate limit exceeded");
}

// ──────────────────────────────────────────────
// Device protocol
// ──────────────────────────────────────────────

#[test]
fn device_subscribes_and_sees_other_devices_updates() {
    let server = start_server(&["--children", "child-1"], &[]);

    let mut tablet = WsClient::connect(server.port);
    tablet.send(json!({
        "event": "subscribe",
        "data": {"childId": "child-1", "deviceId": "tablet", "sessionId": "t"}
    }));
    assert_eq!(tablet.recv()["event"], "joined");
    assert_eq!(tablet.recv()["event"], "progress-state");

    let mut phone = WsClient::connect(server.port);
    phone.send(json!({
        "event": "subscribe",
        "data": {"childId": "child-1", "deviceId": "phone", "sessionId": "p"}
    }));
    assert_eq!(phone.recv()["event"], "joined");
    assert_eq!(phone.recv()["event"], "progress-state");

    let (_, body) = get(server.port, "/children/child-1/devices");
    assert_eq!(body["connectedDevices"], 2);

    phone.send(json!({
        "event": "progress-update",
        "data": {
            "childId": "child-1",
            "activityId": "math-1",
            "progress": 75,
            "deviceId": "phone",
            "sessionId": "p"
        }
    }));

    let event = tablet.recv();
    assert_eq!(event["event"], "progress-updated");
    assert_eq!(event["data"]["progress"], 75.0);
    assert_eq!(event["data"]["deviceId"], "phone");

    let (_, body) = get(server.port, "/children/child-1/progress");
    assert_eq!(body["snapshot"][0]["progress"], 75.0);
}

#[test]
fn subscribing_to_unknown_child_yields_error_event() {
    let server = start_server(&["--children", "child-1"], &[]);

    let mut device = WsClient::connect(server.port);
    device.send(json!({
        "event": "subscribe",
        "data": {"childId": "ghost", "deviceId": "tablet"}
    }));

    let event = device.recv();
    assert_eq!(event["event"], "error");
    assert!(event["data"]["message"].as_str().unwrap().contains("ghost"));
}

#[test]
fn queued_offline_updates_replay_on_subscribe() {
    let server = start_server(&[], &[]);
    for (progress, ts) in [(20, 1000), (60, 2000)] {
        let (status, _) = post(
            server.port,
            "/devices/tablet/offline-queue",
            json!({
                "childId": "child-1",
                "activityId": "math-1",
                "progress": progress,
                "timestamp": ts,
                "deviceId": "tablet"
            }),
        );
        assert_eq!(status, 202);
    }

    let mut tablet = WsClient::connect(server.port);
    tablet.send(json!({
        "event": "subscribe",
        "data": {"childId": "child-1", "deviceId": "tablet"}
    }));
    assert_eq!(tablet.recv()["event"], "joined");
    let state = tablet.recv();
    assert_eq!(state["event"], "progress-state");
    assert_eq!(state["data"]["snapshot"][0]["progress"], 60.0);
    let complete = tablet.recv();
    assert_eq!(complete["event"], "offline-sync-complete");
    assert_eq!(complete["data"]["syncedUpdates"], 2);
}
