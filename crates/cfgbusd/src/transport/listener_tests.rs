//! Tests for the socket listener.

use std::net::TcpStream;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use camino::Utf8PathBuf;
use cfgbus_config::SocketEndpoint;
use cfgbus_types::Envelope;
use cfgbus_types::frame::{MAX_FRAME_BYTES, read_frame, write_frame};
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use super::listener::SocketListener;
use super::{CountingHandler, FramedDispatchHandler, ListenerError, wait_until};
use crate::notify::NotificationSender;
use crate::router::{ModuleRegistry, Router};

#[fixture]
fn tcp_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", 0)
}

#[fixture]
fn unix_tempdir() -> TempDir {
    tempfile::tempdir().expect("temp dir")
}

fn socket_path(dir: &TempDir) -> (PathBuf, SocketEndpoint) {
    let path = dir.path().join("cfgbusd.sock");
    let utf8 = Utf8PathBuf::from_path_buf(path.clone()).expect("utf8 path");
    (path, SocketEndpoint::unix(utf8))
}

#[rstest]
fn tcp_listener_accepts_connections(tcp_endpoint: SocketEndpoint) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let addr = listener.local_addr().expect("listener should report local address");
    let (count, handler) = CountingHandler::new();
    let handle = listener.start(handler).expect("start listener");

    TcpStream::connect(addr).expect("connect first client");
    TcpStream::connect(addr).expect("connect second client");

    assert!(
        wait_until(|| count.load(Ordering::SeqCst) >= 2),
        "expected two connections"
    );
    handle.shutdown();
    handle.join().expect("join listener");
}

#[rstest]
fn unix_listener_replaces_stale_socket(unix_tempdir: TempDir) {
    let (path, endpoint) = socket_path(&unix_tempdir);
    drop(UnixListener::bind(&path).expect("bind stale listener"));
    assert!(path.exists(), "stale socket should remain");

    let listener = SocketListener::bind(&endpoint).expect("bind new listener");
    let (count, handler) = CountingHandler::new();
    let handle = listener.start(handler).expect("start listener");

    UnixStream::connect(&path).expect("connect unix client");
    assert!(wait_until(|| count.load(Ordering::SeqCst) == 1));

    handle.shutdown();
    handle.join().expect("join listener");
    assert!(!path.exists(), "listener should remove unix socket on shutdown");
}

#[rstest]
fn unix_listener_rejects_in_use_socket(unix_tempdir: TempDir) {
    let (path, endpoint) = socket_path(&unix_tempdir);
    let _existing = UnixListener::bind(&path).expect("bind existing listener");

    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, ListenerError::UnixInUse { .. }));
}

#[rstest]
fn unix_listener_rejects_regular_files(unix_tempdir: TempDir) {
    let (path, endpoint) = socket_path(&unix_tempdir);
    std::fs::write(&path, b"not a socket").expect("write file");

    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, ListenerError::UnixNotSocket { .. }));
}

#[rstest]
fn serves_one_frame_per_connection(unix_tempdir: TempDir) {
    let (path, endpoint) = socket_path(&unix_tempdir);
    let router = Router::new(ModuleRegistry::default(), NotificationSender::discard());
    let handler = Arc::new(FramedDispatchHandler::new(Arc::new(router)));
    let handle = SocketListener::bind(&endpoint)
        .expect("bind listener")
        .start(handler)
        .expect("start listener");

    for action in ["first", "second"] {
        let mut client = UnixStream::connect(&path).expect("connect");
        let request = json!({"module": "echo", "action": action, "kind": "request"});
        write_frame(&mut client, &serde_json::to_vec(&request).expect("encode")).expect("write");
        let reply = read_frame(&mut client, MAX_FRAME_BYTES)
            .expect("read reply")
            .expect("reply frame");
        let envelope: Envelope = serde_json::from_slice(&reply).expect("decode");
        assert_eq!(envelope.action, action);
    }

    handle.shutdown();
    handle.join().expect("join listener");
}
