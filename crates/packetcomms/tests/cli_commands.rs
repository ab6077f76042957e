#![cfg(all(unix, feature = "cli"))]

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use packetcomms::frame::TypeRegistry;
use packetcomms::mux::{Connection, ConnectionConfig};

const TYPES: &str = "Telemetry,Command,AvData";

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/pktcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn registry() -> Arc<TypeRegistry> {
    Arc::new(TypeRegistry::new(TYPES.split(',')))
}

fn cli() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_packetcomms"));
    command.arg("--log-level").arg("error");
    command
}

/// The server removes its socket file right after accepting, so the file's
/// presence means it is ready and nobody has connected yet.
fn connect_when_listening(path: &Path) -> Connection {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !path.exists() {
        assert!(Instant::now() < deadline, "server never started listening");
        thread::sleep(Duration::from_millis(20));
    }
    let stream = UnixStream::connect(path).expect("client should connect");
    let connection =
        Connection::with_config(stream, registry(), ConnectionConfig::default()).expect("connection should start");
    assert!(
        connection.demuxer().wait_for_hello(Duration::from_secs(5)),
        "server should say hello"
    );
    connection
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> ExitStatus {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().expect("child status should be readable") {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("child did not exit within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn read_stdout(child: &mut Child) -> Vec<u8> {
    let mut out = Vec::new();
    child
        .stdout
        .take()
        .expect("stdout should be piped")
        .read_to_end(&mut out)
        .expect("stdout should be readable");
    out
}

#[test]
fn listen_prints_received_messages_as_json() {
    let dir = unique_temp_dir("listen");
    let sock = dir.join("listen.sock");

    let mut child = cli()
        .args(["--format", "json", "listen"])
        .arg(format!("unix:{}", sock.display()))
        .args(["--types", TYPES, "--count", "2"])
        .stdout(Stdio::piped())
        .spawn()
        .expect("listen should start");

    let connection = connect_when_listening(&sock);
    connection.muxer().post_named("Telemetry", b"t1".to_vec()).unwrap();
    connection.muxer().post_named("Command", b"go".to_vec()).unwrap();
    assert!(connection.muxer().flush(Duration::from_secs(2)));

    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert!(status.success(), "listen exited with {status}");

    let stdout = String::from_utf8(read_stdout(&mut child)).unwrap();
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be JSON"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["type_name"], "Telemetry");
    assert_eq!(lines[0]["type_id"], 2);
    assert_eq!(lines[0]["payload"], "t1");
    assert_eq!(lines[1]["type_name"], "Command");
    assert_eq!(lines[1]["payload"], "go");
    assert_eq!(lines[1]["payload_size"], 2);
}

#[test]
fn send_reaches_listen_with_type_filter() {
    let dir = unique_temp_dir("send");
    let sock = dir.join("send.sock");
    let addr = format!("unix:{}", sock.display());

    let mut listener = cli()
        .args(["--format", "pretty", "listen", addr.as_str(), "--types", TYPES])
        .args(["--only", "Command", "--count", "2"])
        .stdout(Stdio::piped())
        .spawn()
        .expect("listen should start");

    let deadline = Instant::now() + Duration::from_secs(5);
    while !sock.exists() {
        assert!(Instant::now() < deadline, "listen never started");
        thread::sleep(Duration::from_millis(20));
    }

    let sent = cli()
        .args(["--format", "json", "send", addr.as_str(), "--types", TYPES])
        .args(["--type", "Command", "--data", "stop", "--repeat", "2"])
        .output()
        .expect("send should run");
    assert!(sent.status.success(), "send failed: {}", String::from_utf8_lossy(&sent.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&sent.stdout).unwrap();
    assert_eq!(summary["messages"], 2);
    assert_eq!(summary["bytes"], 8);
    assert_eq!(summary["flushed"], true);

    let status = wait_with_timeout(&mut listener, Duration::from_secs(10));
    assert!(status.success());
    let stdout = String::from_utf8(read_stdout(&mut listener)).unwrap();
    assert!(stdout.contains("(Command)"), "unexpected output: {stdout}");
    assert_eq!(stdout.matches("payload=stop").count(), 2, "unexpected output: {stdout}");
}

#[test]
fn stream_writes_reassembled_bytes_to_stdout() {
    let dir = unique_temp_dir("stream");
    let sock = dir.join("stream.sock");

    let mut child = cli()
        .arg("stream")
        .arg(format!("unix:{}", sock.display()))
        .args(["--types", TYPES, "--type", "AvData"])
        .stdout(Stdio::piped())
        .spawn()
        .expect("stream should start");

    let expected: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    {
        let connection = connect_when_listening(&sock);
        for chunk in expected.chunks(1337) {
            connection.muxer().post_named("AvData", chunk.to_vec()).unwrap();
            connection.muxer().post_named("Telemetry", vec![0xEE]).unwrap();
        }
        assert!(connection.muxer().flush(Duration::from_secs(5)));
    }

    let reader = thread::spawn({
        let mut stdout = child.stdout.take().unwrap();
        move || {
            let mut out = Vec::new();
            stdout.read_to_end(&mut out).unwrap();
            out
        }
    });
    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert!(status.success(), "stream exited with {status}");
    assert_eq!(reader.join().unwrap(), expected);
}

#[test]
fn stream_exits_with_timeout_when_peer_goes_quiet() {
    let dir = unique_temp_dir("stall");
    let sock = dir.join("stall.sock");

    let mut child = cli()
        .arg("stream")
        .arg(format!("unix:{}", sock.display()))
        .args(["--types", TYPES, "--type", "AvData", "--stall-timeout", "300ms"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("stream should start");

    let connection = connect_when_listening(&sock);
    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(124));
    drop(connection);

    let mut stderr = String::new();
    child.stderr.take().unwrap().read_to_string(&mut stderr).unwrap();
    assert!(stderr.contains("stalled"), "unexpected stderr: {stderr}");
}

#[test]
fn send_rejects_unknown_type_before_connecting() {
    let output = cli()
        .args(["send", "unix:/nonexistent/peer.sock", "--types", TYPES])
        .args(["--type", "Video", "--data", "x"])
        .output()
        .expect("send should run");
    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown type"));
}

#[test]
fn send_to_missing_peer_is_a_transport_error() {
    let dir = unique_temp_dir("missing");
    let output = cli()
        .arg("send")
        .arg(format!("unix:{}", dir.join("absent.sock").display()))
        .args(["--types", TYPES, "--type", "Command", "--data", "x"])
        .output()
        .expect("send should run");
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn version_reports_package_version() {
    let output = cli().arg("version").output().expect("version should run");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("packetcomms {}", env!("CARGO_PKG_VERSION"))
    );
}
