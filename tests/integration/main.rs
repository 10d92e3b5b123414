//! End-to-end tests against a running `siad` binary: a real TCP client
//! speaks the Galaxy SIA wire protocol to it, and a small stand-in HTTP
//! server in this process plays the role of the ntfy.sh notification
//! endpoint.
//!
//! Requires `cargo build -p siad` to have produced `target/debug/siad`.
//! Tests are serialized via `DAEMON_LOCK` since they share fixed ports.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sia_core::wire::{self, Command as SiaCommand};

const SIA_PORT: u16 = 19102;
const IP_CHECK_PORT: u16 = 19103;

static DAEMON_LOCK: Mutex<()> = Mutex::new(());

fn siad_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("target/debug/siad")
}

fn binary_available() -> bool {
    siad_path().exists()
}

/// A tiny stand-in HTTP server: accepts any request, records the body and
/// the `Title`/`Priority`/`Authorization` headers, and replies 200.
struct MockNotifyServer {
    addr: std::net::SocketAddr,
    received: Arc<Mutex<Vec<ReceivedNotification>>>,
}

#[derive(Debug, Clone)]
struct ReceivedNotification {
    title: String,
    #[allow(dead_code)]
    priority: String,
    body: String,
}

fn read_http_request(stream: &mut TcpStream) -> Option<(Vec<(String, String)>, String)> {
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(header_end) = find_header_end(&buf) {
            let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let mut lines = header_text.split("\r\n");
            lines.next(); // request line
            let headers: Vec<(String, String)> = lines
                .filter(|l| !l.is_empty())
                .filter_map(|l| l.split_once(':'))
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect();

            let content_length: usize = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(0);

            let body_start = header_end + 4;
            while buf.len() < body_start + content_length {
                let n = stream.read(&mut chunk).ok()?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let body = String::from_utf8_lossy(
                &buf[body_start..buf.len().min(body_start + content_length)],
            )
            .to_string();
            return Some((headers, body));
        }
    }
    None
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

impl MockNotifyServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock notify server");
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                if let Some((headers, body)) = read_http_request(&mut stream) {
                    let get = |name: &str| {
                        headers
                            .iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case(name))
                            .map(|(_, v)| v.clone())
                            .unwrap_or_default()
                    };
                    received_clone.lock().unwrap().push(ReceivedNotification {
                        title: get("Title"),
                        priority: get("Priority"),
                        body,
                    });
                }
                let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
            }
        });

        Self { addr, received }
    }

    fn url(&self) -> String {
        format!("http://{}/notify", self.addr)
    }

    fn wait_for_count(&self, count: usize, timeout: Duration) -> Vec<ReceivedNotification> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            {
                let received = self.received.lock().unwrap();
                if received.len() >= count {
                    return received.clone();
                }
            }
            if std::time::Instant::now() > deadline {
                return self.received.lock().unwrap().clone();
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}

fn write_config(path: &std::path::Path, notify_url: &str) {
    let toml = format!(
        r#"
[listener]
bind_addr = "127.0.0.1"
port = {sia_port}
read_timeout_secs = 5
write_timeout_secs = 5

[ip_check]
enabled = true
bind_addr = "127.0.0.1"
port = {ip_check_port}

[queue]
max_size = 20
max_retries = 2
max_retry_time_minutes = 1
http_timeout_secs = 5

[logging]
level = "info"
directory = ""

[priorities]
default_priority = 3

[routing.default]
site_name = "Test Site"
ntfy_enabled = true
ntfy_topic_url = "{notify_url}"
ntfy_title = "Alarm Event"
"#,
        sia_port = SIA_PORT,
        ip_check_port = IP_CHECK_PORT,
        notify_url = notify_url,
    );
    std::fs::write(path, toml).expect("write test config");
}

fn spawn_daemon(config_path: &std::path::Path) -> Child {
    Command::new(siad_path())
        .env("SIA_CONFIG", config_path)
        .env("RUST_LOG", "info")
        .spawn()
        .expect("failed to spawn siad")
}

fn wait_for_port(addr: &str, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if TcpStream::connect(addr).is_ok() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

fn read_exact_timeout(
    stream: &mut TcpStream,
    buf: &mut [u8],
    timeout: Duration,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.read_exact(buf)
}

/// Read one reply block (ACK or REJECT, both zero-payload: 3 bytes).
fn read_reply(stream: &mut TcpStream) -> std::io::Result<[u8; 3]> {
    let mut buf = [0u8; 3];
    read_exact_timeout(stream, &mut buf, Duration::from_secs(5))?;
    Ok(buf)
}

struct TestHarness {
    daemon: Child,
    _config_dir: tempfile::TempDir,
    notify: MockNotifyServer,
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        let _ = self.daemon.kill();
        let _ = self.daemon.wait();
    }
}

fn start_harness() -> Option<TestHarness> {
    if !binary_available() {
        eprintln!("SKIP: target/debug/siad not built — run: cargo build -p siad");
        return None;
    }
    let dir = tempfile::Builder::new()
        .prefix("sia-integration")
        .tempdir()
        .expect("tempdir");
    let config_path = dir.path().join("config.toml");
    let notify = MockNotifyServer::start();
    write_config(&config_path, &notify.url());

    let daemon = spawn_daemon(&config_path);
    let sia_addr = format!("127.0.0.1:{SIA_PORT}");
    if !wait_for_port(&sia_addr, Duration::from_secs(5)) {
        panic!("siad did not start listening on {sia_addr}");
    }

    Some(TestHarness {
        daemon,
        _config_dir: dir,
        notify,
    })
}

#[test]
fn full_event_is_acknowledged_and_notified() {
    let _lock = DAEMON_LOCK.lock().unwrap();
    let Some(harness) = start_harness() else {
        return;
    };

    let mut stream = TcpStream::connect(format!("127.0.0.1:{SIA_PORT}")).unwrap();

    let account = wire::encode(SiaCommand::AccountId, b"023456");
    stream.write_all(&account).unwrap();
    assert_eq!(read_reply(&mut stream).unwrap(), [0x40, 0x38, 0x87]);

    let event = wire::encode(SiaCommand::NewEvent, b"Nti02:15/BA1012");
    stream.write_all(&event).unwrap();
    assert_eq!(read_reply(&mut stream).unwrap(), [0x40, 0x38, 0x87]);

    let end = wire::encode(SiaCommand::EndOfData, &[]);
    stream.write_all(&end).unwrap();
    assert_eq!(read_reply(&mut stream).unwrap(), [0x40, 0x38, 0x87]);

    let notifications = harness.notify.wait_for_count(1, Duration::from_secs(5));
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].title.contains("Test Site"));
    assert!(notifications[0].body.contains("Zone: 1012"));
}

#[test]
fn end_of_data_closes_the_connection_after_the_ack() {
    let _lock = DAEMON_LOCK.lock().unwrap();
    let Some(harness) = start_harness() else {
        return;
    };

    let mut stream = TcpStream::connect(format!("127.0.0.1:{SIA_PORT}")).unwrap();

    let account = wire::encode(SiaCommand::AccountId, b"023456");
    stream.write_all(&account).unwrap();
    assert_eq!(read_reply(&mut stream).unwrap(), [0x40, 0x38, 0x87]);

    let end = wire::encode(SiaCommand::EndOfData, &[]);
    stream.write_all(&end).unwrap();
    assert_eq!(read_reply(&mut stream).unwrap(), [0x40, 0x38, 0x87]);

    // The connection handler closes the socket right after the ACK for
    // END_OF_DATA — a second batch on the same connection gets no reply,
    // only EOF, instead of being read and acknowledged as if Reading had
    // resumed.
    let second_account = wire::encode(SiaCommand::AccountId, b"758432");
    let _ = stream.write_all(&second_account);
    let mut buf = [0u8; 3];
    stream.set_read_timeout(Some(Duration::from_secs(2))).ok();
    match stream.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("expected connection close after END_OF_DATA, got {n} bytes"),
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            panic!("expected prompt close after END_OF_DATA, got timeout instead")
        }
        Err(_) => {} // reset is also an acceptable close signal
    }

    // Exactly one notification for the first batch; nothing for the second.
    let notifications = harness.notify.wait_for_count(1, Duration::from_secs(5));
    assert_eq!(notifications.len(), 1);
}

#[test]
fn malformed_checksum_is_rejected_with_exact_bytes() {
    let _lock = DAEMON_LOCK.lock().unwrap();
    let Some(_harness) = start_harness() else {
        return;
    };

    let mut stream = TcpStream::connect(format!("127.0.0.1:{SIA_PORT}")).unwrap();

    let mut bad_block = wire::encode(SiaCommand::AccountId, b"023456");
    *bad_block.last_mut().unwrap() ^= 0xFF;
    stream.write_all(&bad_block).unwrap();

    assert_eq!(read_reply(&mut stream).unwrap(), [0x40, 0x39, 0x86]);
}

#[test]
fn two_accounts_in_one_connection_produce_two_notifications() {
    let _lock = DAEMON_LOCK.lock().unwrap();
    let Some(harness) = start_harness() else {
        return;
    };

    let mut stream = TcpStream::connect(format!("127.0.0.1:{SIA_PORT}")).unwrap();

    for block in [
        wire::encode(SiaCommand::AccountId, b"023456"),
        wire::encode(SiaCommand::NewEvent, b"Nti10:00/OP"),
        wire::encode(SiaCommand::AccountId, b"758432"),
        wire::encode(SiaCommand::NewEvent, b"Nti10:01/CL"),
        wire::encode(SiaCommand::EndOfData, &[]),
    ] {
        stream.write_all(&block).unwrap();
        read_reply(&mut stream).unwrap();
    }

    let notifications = harness.notify.wait_for_count(2, Duration::from_secs(5));
    assert_eq!(notifications.len(), 2);
}

#[test]
fn ascii_block_transliterates_into_notification_body() {
    let _lock = DAEMON_LOCK.lock().unwrap();
    let Some(harness) = start_harness() else {
        return;
    };

    let mut stream = TcpStream::connect(format!("127.0.0.1:{SIA_PORT}")).unwrap();

    for block in [
        wire::encode(SiaCommand::AccountId, b"023456"),
        wire::encode(SiaCommand::NewEvent, b"Nti10:00/OP"),
        wire::encode(SiaCommand::Ascii, &[0x50, 0xC5, 0x53, 0x4C, 0x41, 0x47]),
        wire::encode(SiaCommand::EndOfData, &[]),
    ] {
        stream.write_all(&block).unwrap();
        read_reply(&mut stream).unwrap();
    }

    let notifications = harness.notify.wait_for_count(1, Duration::from_secs(5));
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].body.contains("PÅSLAG"));
}

#[test]
fn encryption_handshake_closes_connection_silently() {
    let _lock = DAEMON_LOCK.lock().unwrap();
    let Some(_harness) = start_harness() else {
        return;
    };

    let mut stream = TcpStream::connect(format!("127.0.0.1:{SIA_PORT}")).unwrap();
    stream.write_all(&[0x05, 0x01, 0x00, 0x00]).unwrap();

    let mut buf = [0u8; 3];
    stream.set_read_timeout(Some(Duration::from_secs(2))).ok();
    let result = stream.read(&mut buf);
    match result {
        Ok(0) => {} // connection closed, as expected
        Ok(n) => panic!("expected connection close, got {n} bytes"),
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            panic!("expected prompt close, got timeout instead")
        }
        Err(_) => {} // reset is also an acceptable close signal
    }
}

#[test]
fn ip_check_listener_accepts_bare_connections() {
    let _lock = DAEMON_LOCK.lock().unwrap();
    let Some(_harness) = start_harness() else {
        return;
    };

    assert!(wait_for_port(
        &format!("127.0.0.1:{IP_CHECK_PORT}"),
        Duration::from_secs(2)
    ));
}
