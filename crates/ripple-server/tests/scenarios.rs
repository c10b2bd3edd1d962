//! End-to-end scenarios over in-process duplex connections.
//!
//! Each test assembles the full serving stack — shards, worker
//! registry, watch fabric — and drives it through real wire frames,
//! exactly as a TCP client would, minus the socket.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, watch};

use ripple_core::{CommandTable, ShardManager, ShardSet};
use ripple_protocol::{encode_command, parse_frame, Frame};
use ripple_server::config::{Config, WalEngine};
use ripple_server::restore;
use ripple_server::watch::WatchFabric;
use ripple_server::worker::{self, WorkerContext};
use ripple_server::worker_manager::{OverflowPolicy, WorkerManager};
use ripple_wal::{NullWal, SegmentedWal, WalSink};

// -- harness ---------------------------------------------------------------

fn test_config(num_shards: usize) -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        num_shards,
        keys_limit: None,
        eviction_sample: 5,
        enable_watch: false,
        enable_wal: false,
        wal_engine: WalEngine::Null,
        wal_dir: std::env::temp_dir(),
        restore_wal: false,
        strict_degraded: false,
        require_pass: None,
        max_clients: 64,
        notify_buffer: 64,
        watch_buffer: 1024,
        overflow_policy: OverflowPolicy::DropOldest,
        command_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_secs(5),
    }
}

struct TestServer {
    ctx: WorkerContext,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    shard_set: Option<ShardSet>,
}

fn spawn_stack(config: Config, wal: Arc<dyn WalSink>) -> TestServer {
    let config = Arc::new(config);
    let table = Arc::new(CommandTable::standard());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (shards, shard_set, streams) = ShardManager::spawn(
        &config.engine(),
        Arc::clone(&table),
        wal,
        shutdown_rx.clone(),
        config.enable_watch,
    );
    let workers = Arc::new(WorkerManager::new(
        config.max_clients,
        config.notify_buffer,
        config.overflow_policy,
    ));
    let watch_tx = streams.map(|streams| {
        let (tx, rx) = mpsc::channel(64);
        let fabric = WatchFabric::new(Arc::clone(&shards), Arc::clone(&workers), rx, streams);
        tokio::spawn(fabric.run(shutdown_rx.clone()));
        tx
    });

    TestServer {
        ctx: WorkerContext {
            config,
            table,
            shards,
            workers,
            watch_tx,
        },
        shutdown_tx,
        shutdown_rx,
        shard_set: Some(shard_set),
    }
}

impl TestServer {
    fn connect(&self) -> TestClient {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let registration = self.ctx.workers.register().expect("register worker");
        tokio::spawn(worker::run(
            server,
            registration,
            self.ctx.clone(),
            self.shutdown_rx.clone(),
        ));
        TestClient {
            stream: client,
            buf: BytesMut::new(),
        }
    }

    async fn shutdown(mut self) {
        self.shutdown_tx.send(true).expect("signal shutdown");
        self.shard_set.take().expect("shard set").join().await;
    }
}

struct TestClient {
    stream: DuplexStream,
    buf: BytesMut,
}

impl TestClient {
    async fn send(&mut self, parts: &[&str]) {
        let parts: Vec<Bytes> = parts
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect();
        self.stream
            .write_all(&encode_command(&parts))
            .await
            .expect("write command");
    }

    async fn recv(&mut self) -> Frame {
        loop {
            if let Some((frame, consumed)) = parse_frame(&self.buf).expect("parse frame") {
                self.buf.advance(consumed);
                return frame;
            }
            let n = self
                .stream
                .read_buf(&mut self.buf)
                .await
                .expect("read from server");
            assert!(n > 0, "connection closed while awaiting a frame");
        }
    }

    async fn roundtrip(&mut self, parts: &[&str]) -> Frame {
        self.send(parts).await;
        self.recv().await
    }

    /// Asserts that nothing arrives within a short window.
    async fn expect_silence(&mut self) {
        let quiet =
            tokio::time::timeout(Duration::from_millis(300), self.stream.read_buf(&mut self.buf))
                .await;
        assert!(quiet.is_err(), "expected no frame, got {:?}", &self.buf[..]);
    }

    /// Asserts the server closed the connection.
    async fn expect_closed(&mut self) {
        let n = tokio::time::timeout(
            Duration::from_secs(2),
            self.stream.read_buf(&mut self.buf),
        )
        .await
        .expect("timed out waiting for close")
        .expect("read");
        assert_eq!(n, 0, "expected EOF");
    }
}

fn ok() -> Frame {
    Frame::Simple("OK".into())
}

fn bulk(s: &str) -> Frame {
    Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
}

// -- scenarios -------------------------------------------------------------

#[tokio::test]
async fn two_connections_across_two_shards() {
    let server = spawn_stack(test_config(2), Arc::new(NullWal::new()));
    let mut conn_a = server.connect();
    let mut conn_b = server.connect();

    assert_eq!(conn_a.roundtrip(&["SET", "user:1", "alice"]).await, ok());
    assert_eq!(conn_b.roundtrip(&["SET", "user:2", "bob"]).await, ok());

    // either connection observes both writes
    assert_eq!(conn_b.roundtrip(&["GET", "user:1"]).await, bulk("alice"));
    assert_eq!(conn_a.roundtrip(&["GET", "user:2"]).await, bulk("bob"));
}

#[tokio::test]
async fn ping_echo_and_unknown() {
    let server = spawn_stack(test_config(1), Arc::new(NullWal::new()));
    let mut c = server.connect();

    assert_eq!(c.roundtrip(&["PING"]).await, Frame::Simple("PONG".into()));
    assert_eq!(c.roundtrip(&["ping", "hey"]).await, bulk("hey"));
    assert_eq!(c.roundtrip(&["ECHO", "hello"]).await, bulk("hello"));

    match c.roundtrip(&["FROB", "x"]).await {
        Frame::Error(msg) => assert!(msg.contains("unknown command")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn pipelined_commands_answer_in_order() {
    let server = spawn_stack(test_config(2), Arc::new(NullWal::new()));
    let mut c = server.connect();

    // two commands in a single write
    let mut batch = BytesMut::new();
    batch.extend_from_slice(&encode_command(&[
        Bytes::from("SET"),
        Bytes::from("p"),
        Bytes::from("1"),
    ]));
    batch.extend_from_slice(&encode_command(&[Bytes::from("GET"), Bytes::from("p")]));
    c.stream.write_all(&batch).await.unwrap();

    assert_eq!(c.recv().await, ok());
    assert_eq!(c.recv().await, bulk("1"));
}

#[tokio::test]
async fn mget_preserves_argument_order_across_shards() {
    let server = spawn_stack(test_config(2), Arc::new(NullWal::new()));
    let mut c = server.connect();

    c.roundtrip(&["SET", "a", "1"]).await;
    c.roundtrip(&["SET", "b", "2"]).await;
    c.roundtrip(&["SET", "c", "3"]).await;

    assert_eq!(
        c.roundtrip(&["MGET", "a", "b", "c"]).await,
        Frame::Array(vec![bulk("1"), bulk("2"), bulk("3")])
    );

    // missing keys surface as positional nulls
    assert_eq!(
        c.roundtrip(&["MGET", "a", "nope", "c"]).await,
        Frame::Array(vec![bulk("1"), Frame::Null, bulk("3")])
    );
}

#[tokio::test]
async fn multi_key_del_and_exists_count_across_shards() {
    let server = spawn_stack(test_config(4), Arc::new(NullWal::new()));
    let mut c = server.connect();

    c.roundtrip(&["MSET", "k1", "a", "k2", "b", "k3", "c"]).await;
    assert_eq!(
        c.roundtrip(&["EXISTS", "k1", "k2", "k3", "k4"]).await,
        Frame::Integer(3)
    );
    assert_eq!(
        c.roundtrip(&["DEL", "k1", "k3", "k4"]).await,
        Frame::Integer(2)
    );
    assert_eq!(c.roundtrip(&["GET", "k1"]).await, Frame::Null);
    assert_eq!(c.roundtrip(&["GET", "k2"]).await, bulk("b"));
}

#[tokio::test]
async fn keys_limit_evicts_down_to_bound() {
    let mut config = test_config(1);
    config.keys_limit = Some(2);
    let server = spawn_stack(config, Arc::new(NullWal::new()));
    let mut c = server.connect();

    c.roundtrip(&["SET", "a", "1"]).await;
    c.roundtrip(&["SET", "b", "2"]).await;
    c.roundtrip(&["SET", "c", "3"]).await;

    assert_eq!(c.roundtrip(&["DBSIZE"]).await, Frame::Integer(2));
    // the newest key always survives admission
    assert_eq!(c.roundtrip(&["EXISTS", "c"]).await, Frame::Integer(1));
}

#[tokio::test]
async fn wrong_type_keeps_the_connection_alive() {
    let server = spawn_stack(test_config(1), Arc::new(NullWal::new()));
    let mut c = server.connect();

    c.roundtrip(&["LPUSH", "list", "x"]).await;
    match c.roundtrip(&["INCR", "list"]).await {
        Frame::Error(msg) => assert!(msg.starts_with("WRONGTYPE")),
        other => panic!("expected WRONGTYPE, got {other:?}"),
    }
    // still serving
    assert_eq!(c.roundtrip(&["PING"]).await, Frame::Simple("PONG".into()));
}

#[tokio::test]
async fn auth_gate() {
    let mut config = test_config(1);
    config.require_pass = Some("sesame".into());
    let server = spawn_stack(config, Arc::new(NullWal::new()));
    let mut c = server.connect();

    match c.roundtrip(&["GET", "k"]).await {
        Frame::Error(msg) => assert!(msg.starts_with("NOAUTH")),
        other => panic!("expected NOAUTH, got {other:?}"),
    }
    match c.roundtrip(&["AUTH", "wrong"]).await {
        Frame::Error(msg) => assert!(msg.contains("invalid password")),
        other => panic!("expected auth failure, got {other:?}"),
    }
    assert_eq!(c.roundtrip(&["AUTH", "sesame"]).await, ok());
    assert_eq!(c.roundtrip(&["GET", "k"]).await, Frame::Null);
}

#[tokio::test]
async fn too_many_clients_is_rejected_at_registration() {
    let mut config = test_config(1);
    config.max_clients = 1;
    let server = spawn_stack(config, Arc::new(NullWal::new()));

    let _first = server.ctx.workers.register().unwrap();
    let err = server.ctx.workers.register().unwrap_err();
    assert_eq!(err.kind, ripple_core::ErrorKind::TooManyClients);
}

#[tokio::test]
async fn wal_replay_restores_state() {
    let dir = tempfile::tempdir().unwrap();

    // first process lifetime: log through the segmented WAL
    {
        let wal: Arc<dyn WalSink> = Arc::new(SegmentedWal::new(dir.path()));
        wal.init(SystemTime::now()).unwrap();
        let server = spawn_stack(test_config(2), Arc::clone(&wal));
        let mut c = server.connect();

        assert_eq!(c.roundtrip(&["SET", "x", "1"]).await, ok());
        assert_eq!(c.roundtrip(&["INCR", "x"]).await, Frame::Integer(2));
        assert_eq!(c.roundtrip(&["INCR", "x"]).await, Frame::Integer(3));
        assert_eq!(c.roundtrip(&["DEL", "x"]).await, Frame::Integer(1));
        assert_eq!(c.roundtrip(&["SET", "keep", "v"]).await, ok());

        server.shutdown().await;
        wal.shutdown().unwrap();
    }

    // second lifetime: fresh shards, replay, verify
    let server = spawn_stack(test_config(2), Arc::new(NullWal::new()));
    let replay_wal: Arc<dyn WalSink> = Arc::new(SegmentedWal::new(dir.path()));
    let count = restore::replay_wal(replay_wal, &server.ctx.shards)
        .await
        .unwrap();
    assert_eq!(count, 5);

    let mut c = server.connect();
    assert_eq!(c.roundtrip(&["GET", "x"]).await, Frame::Null);
    assert_eq!(c.roundtrip(&["EXISTS", "x"]).await, Frame::Integer(0));
    assert_eq!(c.roundtrip(&["GET", "keep"]).await, bulk("v"));
}

#[tokio::test]
async fn watch_notifies_with_rising_seq() {
    let mut config = test_config(2);
    config.enable_watch = true;
    let server = spawn_stack(config, Arc::new(NullWal::new()));

    let mut writer = server.connect();
    // pre-subscription traffic raises the shard's sequence high-water
    assert_eq!(writer.roundtrip(&["SET", "foo", "a"]).await, ok());

    let mut watcher = server.connect();
    let fp = match watcher.roundtrip(&["WATCH", "GET", "foo"]).await {
        Frame::Array(items) => {
            assert_eq!(items.len(), 2);
            assert_eq!(items[1], bulk("a"), "initial snapshot");
            match &items[0] {
                Frame::Bulk(fp) => fp.clone(),
                other => panic!("expected fingerprint, got {other:?}"),
            }
        }
        other => panic!("expected subscription reply, got {other:?}"),
    };

    assert_eq!(writer.roundtrip(&["SET", "foo", "hello"]).await, ok());

    let note = tokio::time::timeout(Duration::from_secs(2), watcher.recv())
        .await
        .expect("notification should arrive");
    match note {
        Frame::Array(items) => {
            assert_eq!(items[0], Frame::Bulk(fp));
            match items[1] {
                Frame::Integer(seq) => {
                    assert!(seq >= 2, "seq must exceed the pre-subscription high-water");
                }
                ref other => panic!("expected seq, got {other:?}"),
            }
            assert_eq!(items[2], bulk("hello"));
        }
        other => panic!("expected notification envelope, got {other:?}"),
    }
}

#[tokio::test]
async fn watch_with_null_snapshot_and_no_duplicate_notifications() {
    let mut config = test_config(1);
    config.enable_watch = true;
    let server = spawn_stack(config, Arc::new(NullWal::new()));

    let mut watcher = server.connect();
    match watcher.roundtrip(&["WATCH", "GET", "fresh"]).await {
        Frame::Array(items) => assert_eq!(items[1], Frame::Null),
        other => panic!("expected subscription reply, got {other:?}"),
    }

    let mut writer = server.connect();
    writer.roundtrip(&["SET", "fresh", "v"]).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), watcher.recv())
        .await
        .expect("first notification");

    // same value again: the result hash is unchanged, nothing is sent
    writer.roundtrip(&["SET", "fresh", "v"]).await;
    watcher.expect_silence().await;
}

#[tokio::test]
async fn unwatch_stops_notifications() {
    let mut config = test_config(1);
    config.enable_watch = true;
    let server = spawn_stack(config, Arc::new(NullWal::new()));

    let mut watcher = server.connect();
    watcher.roundtrip(&["WATCH", "GET", "foo"]).await;
    assert_eq!(watcher.roundtrip(&["UNWATCH", "GET", "foo"]).await, ok());

    let mut writer = server.connect();
    writer.roundtrip(&["SET", "foo", "x"]).await;
    watcher.expect_silence().await;
}

#[tokio::test]
async fn command_pattern_watch_forwards_matching_events() {
    let mut config = test_config(1);
    config.enable_watch = true;
    let server = spawn_stack(config, Arc::new(NullWal::new()));

    let mut watcher = server.connect();
    match watcher.roundtrip(&["WATCH", "SET", "user:*"]).await {
        Frame::Array(items) => assert_eq!(items[1], ok()),
        other => panic!("expected subscription ack, got {other:?}"),
    }

    let mut writer = server.connect();
    writer.roundtrip(&["SET", "user:1", "alice"]).await;

    let note = tokio::time::timeout(Duration::from_secs(2), watcher.recv())
        .await
        .expect("pattern notification");
    match note {
        Frame::Array(items) => match &items[2] {
            Frame::Array(event) => {
                assert_eq!(event[0], bulk("create"));
                assert_eq!(event[1], bulk("user:1"));
            }
            other => panic!("expected event payload, got {other:?}"),
        },
        other => panic!("expected notification envelope, got {other:?}"),
    }

    // non-matching key stays silent
    writer.roundtrip(&["SET", "session:1", "x"]).await;
    watcher.expect_silence().await;
}

#[tokio::test]
async fn graceful_shutdown_finishes_in_flight_work() {
    let server = spawn_stack(test_config(2), Arc::new(NullWal::new()));
    let mut c = server.connect();

    // in-flight command completes with its response
    assert_eq!(c.roundtrip(&["SET", "k", "v"]).await, ok());

    server.shutdown().await;
    c.expect_closed().await;
}

#[tokio::test]
async fn flushdb_broadcasts_to_every_shard() {
    let server = spawn_stack(test_config(4), Arc::new(NullWal::new()));
    let mut c = server.connect();

    for i in 0..8 {
        c.roundtrip(&["SET", &format!("k{i}"), "v"]).await;
    }
    assert_eq!(c.roundtrip(&["DBSIZE"]).await, Frame::Integer(8));
    assert_eq!(c.roundtrip(&["FLUSHDB"]).await, ok());
    assert_eq!(c.roundtrip(&["DBSIZE"]).await, Frame::Integer(0));
}

#[tokio::test]
async fn expiry_is_observed_across_the_wire() {
    let server = spawn_stack(test_config(1), Arc::new(NullWal::new()));
    let mut c = server.connect();

    assert_eq!(c.roundtrip(&["SET", "gone", "v", "PX", "40"]).await, ok());
    assert_eq!(c.roundtrip(&["GET", "gone"]).await, bulk("v"));
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(c.roundtrip(&["GET", "gone"]).await, Frame::Null);
    assert_eq!(c.roundtrip(&["TTL", "gone"]).await, Frame::Integer(-2));
}
