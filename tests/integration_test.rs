//! End-to-end scenarios driven over a real `Server` on an ephemeral TCP
//! port, with a raw `TcpStream` client — the happy-path/duplicate-channel/
//! broadcast scenarios are covered as unit tests colocated with
//! `server.rs`/`push.rs`; this file covers the timing- and framing-edge
//! scenarios from `SPEC_FULL.md` §8 that need a real clock and a real byte
//! stream rather than an in-memory cursor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use cm::frame::{Cmd, Message, MAGIC_NUMBER, MAX_BODY_LEN};
use cm::{AuthReply, Handler, Options, Server, Session};

struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn on_auth(&self, body: &[u8]) -> AuthReply {
        if body == b"ok" {
            AuthReply::ok("u1", "web")
        } else {
            AuthReply::reject("rejected")
        }
    }

    async fn on_receive(&self, _session: &Session, body: &[u8]) -> Vec<u8> {
        body.to_vec()
    }

    async fn on_close(&self, _session: &Session) {}
}

async fn spawn_server(options: Options) -> (Arc<Server>, std::net::SocketAddr) {
    let server = Server::new(Arc::new(EchoHandler), options);
    let listener = cm::listener::CmListener::bind("tcp://127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_for_accept = server.clone();
    tokio::spawn(async move {
        let _ = server_for_accept.run_listener(listener).await;
    });
    (server, addr)
}

#[tokio::test]
async fn auth_timeout_closes_silent_connection() {
    let (_server, addr) = spawn_server(Options {
        auth_timeout: Duration::from_millis(100),
        heartbeat_timeout: Duration::from_secs(90),
        ..Options::default()
    })
    .await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("server should have closed the connection after the auth timeout")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn heartbeat_timeout_closes_authenticated_session() {
    let (server, addr) = spawn_server(Options {
        auth_timeout: Duration::from_secs(10),
        heartbeat_timeout: Duration::from_millis(100),
        ..Options::default()
    })
    .await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut auth = Message::new();
    auth.set_cmd(Cmd::Auth).set_request_id(1).set_body(b"ok".to_vec());
    stream.write_all(&auth.encode()).await.unwrap();
    Message::decode(&mut stream).await.unwrap();

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("server should have closed the connection after the heartbeat timeout")
        .unwrap();
    assert_eq!(n, 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        server.registry().get("u1").await.is_none(),
        "the now-empty room should have been reaped"
    );
}

#[tokio::test]
async fn heartbeat_resets_the_timer() {
    let (_server, addr) = spawn_server(Options {
        auth_timeout: Duration::from_secs(10),
        heartbeat_timeout: Duration::from_millis(200),
        ..Options::default()
    })
    .await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut auth = Message::new();
    auth.set_cmd(Cmd::Auth).set_request_id(1).set_body(b"ok".to_vec());
    stream.write_all(&auth.encode()).await.unwrap();
    Message::decode(&mut stream).await.unwrap();

    for i in 0..3u32 {
        tokio::time::sleep(Duration::from_millis(120)).await;
        let mut hb = Message::new();
        hb.set_cmd(Cmd::Heartbeat).set_request_id(i);
        stream.write_all(&hb.encode()).await.unwrap();
        let ack = Message::decode(&mut stream).await.unwrap();
        assert_eq!(ack.cmd(), Cmd::Heartbeat);
        assert_eq!(ack.request_id(), i);
    }
}

#[tokio::test]
async fn oversized_frame_is_rejected_without_reaching_the_handler() {
    let (_server, addr) = spawn_server(Options::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut header = [0u8; 20];
    header[0..4].copy_from_slice(&MAGIC_NUMBER.to_be_bytes());
    header[4..8].copy_from_slice(&20u32.to_be_bytes());
    header[8..12].copy_from_slice(&(Cmd::Auth as u32).to_be_bytes());
    header[16..20].copy_from_slice(&(MAX_BODY_LEN + 1).to_be_bytes());
    stream.write_all(&header).await.unwrap();

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("server should close the connection rather than wait for an oversized body")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn explicit_close_ends_the_session_cleanly() {
    let (_server, addr) = spawn_server(Options::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut auth = Message::new();
    auth.set_cmd(Cmd::Auth).set_request_id(1).set_body(b"ok".to_vec());
    stream.write_all(&auth.encode()).await.unwrap();
    Message::decode(&mut stream).await.unwrap();

    let mut close = Message::new();
    close.set_cmd(Cmd::Close).set_request_id(2);
    stream.write_all(&close.encode()).await.unwrap();

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

struct OnCloseCountingHandler {
    closes: Arc<std::sync::atomic::AtomicUsize>,
}

#[async_trait]
impl Handler for OnCloseCountingHandler {
    async fn on_auth(&self, body: &[u8]) -> AuthReply {
        if body == b"ok" {
            AuthReply::ok("u1", "web")
        } else {
            AuthReply::reject("rejected")
        }
    }

    async fn on_receive(&self, _session: &Session, body: &[u8]) -> Vec<u8> {
        body.to_vec()
    }

    async fn on_close(&self, _session: &Session) {
        self.closes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// `Handler::on_close` must fire exactly once per connection regardless of
/// whether the session ever reached registration — `SPEC_FULL.md` §6/§8,
/// scenario 2 ("auth timeout ... on_close fires; no rooms were touched").
#[tokio::test]
async fn handler_on_close_fires_after_auth_timeout() {
    let closes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let server = Server::new(
        Arc::new(OnCloseCountingHandler { closes: closes.clone() }),
        Options {
            auth_timeout: Duration::from_millis(100),
            heartbeat_timeout: Duration::from_secs(90),
            ..Options::default()
        },
    );
    let listener = cm::listener::CmListener::bind("tcp://127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run_listener(listener).await;
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 1];
    tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);
}

/// Same invariant on the happy path: one authenticated session, one
/// `on_close` call, fired after an explicit `Close` frame.
#[tokio::test]
async fn handler_on_close_fires_after_authenticated_session_closes() {
    let closes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let server = Server::new(
        Arc::new(OnCloseCountingHandler { closes: closes.clone() }),
        Options::default(),
    );
    let listener = cm::listener::CmListener::bind("tcp://127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run_listener(listener).await;
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut auth = Message::new();
    auth.set_cmd(Cmd::Auth).set_request_id(1).set_body(b"ok".to_vec());
    stream.write_all(&auth.encode()).await.unwrap();
    Message::decode(&mut stream).await.unwrap();

    let mut close = Message::new();
    close.set_cmd(Cmd::Close).set_request_id(2);
    stream.write_all(&close.encode()).await.unwrap();

    let mut buf = [0u8; 1];
    tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);
}

/// A configured read deadline closes a connection that authenticates but
/// then goes silent for longer than the deadline — distinct from the
/// heartbeat timeout, which only fires in the steady state after the first
/// heartbeat-timer reset; `read_timeout` bounds every individual frame read,
/// including the very first one after auth.
#[tokio::test]
async fn read_timeout_closes_a_slow_reader() {
    let (_server, addr) = spawn_server(Options {
        auth_timeout: Duration::from_secs(10),
        heartbeat_timeout: Duration::from_secs(90),
        read_timeout: Some(Duration::from_millis(100)),
        ..Options::default()
    })
    .await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut auth = Message::new();
    auth.set_cmd(Cmd::Auth).set_request_id(1).set_body(b"ok".to_vec());
    stream.write_all(&auth.encode()).await.unwrap();
    Message::decode(&mut stream).await.unwrap();

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("server should close the connection once the read deadline elapses")
        .unwrap();
    assert_eq!(n, 0);
}
