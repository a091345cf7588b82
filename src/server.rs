//! The Server Engine: accept loop, per-connection auth/read/write loops,
//! registration, graceful shutdown. See `SPEC_FULL.md` §4.6.
//!
//! Grounded on `server/server.go`'s `Run`/`serve`/`readLoop`/`writeLoop`/
//! `addChannel` state machine, and the daemon's own `ipc/mod.rs::run`/
//! `handle_connection` shape (a `tokio::select! { shutdown => ..., accept =>
//! spawn ... }` accept loop, one task per connection, a shutdown signal every
//! in-flight task also selects against).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::Instrument;

use crate::error::{CmError, Result};
use crate::frame::{Cmd, Message};
use crate::handler::Handler;
use crate::listener::{Accepted, CmListener};
use crate::pool::MessagePool;
use crate::registry::Registry;
use crate::session::Session;
use crate::transport::RequiresFullWrite;

/// Default 10s auth window / 90s heartbeat window, per `SPEC_FULL.md` §4.8.
#[derive(Debug, Clone)]
pub struct Options {
    pub auth_timeout: Duration,
    pub heartbeat_timeout: Duration,
    /// Per-call deadline on a single frame read. `None` disables it — the
    /// direct analogue of the Go original's `ReadTimeout == 0`. Unlike the
    /// original's per-syscall deadline reset (`transport/tcp/conn.go`), this
    /// is enforced per whole-frame `decode()`, the natural granularity once
    /// the transport is hidden behind `AsyncRead`/`AsyncWrite`.
    pub read_timeout: Option<Duration>,
    /// Per-call deadline on a single frame write. `None` disables it.
    pub write_timeout: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            auth_timeout: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(90),
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// A single frame read/write exceeded its configured deadline. Folded into
/// `CmError::Io` (via `From<std::io::Error>`) rather than a dedicated
/// variant — it's an I/O failure from the caller's perspective, same as a
/// reset socket, and is handled identically (close the session, log at
/// info).
fn io_timeout(op: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, format!("{op} timed out"))
}

pub struct Server {
    registry: Arc<Registry>,
    handler: Arc<dyn Handler>,
    pool: Arc<MessagePool>,
    options: Options,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

impl Server {
    pub fn new(handler: Arc<dyn Handler>, options: Options) -> Arc<Server> {
        Arc::new(Server {
            registry: Arc::new(Registry::new()),
            handler,
            pool: Arc::new(MessagePool::new()),
            options,
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Exposed for `push.rs`'s encode-once fan-out path, which lives outside
    /// this module to keep the push API's filter-predicate machinery
    /// separate from the session state machine.
    pub(crate) fn pool_acquire(&self) -> Message {
        self.pool.acquire()
    }

    pub(crate) fn pool_release(&self, msg: Message) {
        self.pool.release(msg)
    }

    /// Stops the accept loop and every in-flight session loop on their next
    /// `select!` poll. Idempotent.
    pub fn shutdown(&self) {
        if self
            .shutdown
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shutdown_notify.notify_waiters();
        }
    }

    /// See the `Notify` race note in `session.rs::closed_signal` — the same
    /// idiom applies here.
    async fn shutdown_signal(&self) {
        let notified = self.shutdown_notify.notified();
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    /// Binds `addr` and accepts connections until `shutdown()` is called.
    pub async fn run(self: &Arc<Self>, addr: &str) -> Result<()> {
        let listener = CmListener::bind(addr).await?;
        tracing::info!(addr, local_addr = %listener.local_addr()?, "listening");
        self.run_listener(listener).await
    }

    /// Accepts connections on an already-bound listener until `shutdown()`
    /// is called. Split out from `run` so callers that need the concrete
    /// local address up front (e.g. binding to an ephemeral port in tests)
    /// can bind first and hand the listener over.
    pub async fn run_listener(self: &Arc<Self>, listener: CmListener) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_signal() => {
                    tracing::info!("shutdown signal received; accept loop stopping");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((accepted, peer)) => {
                            let server = self.clone();
                            tokio::spawn(
                                async move { server.serve_connection(accepted, peer).await }
                                    .instrument(tracing::info_span!("session", remote_addr = %peer)),
                            );
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn serve_connection(self: Arc<Self>, accepted: Accepted, peer: std::net::SocketAddr) {
        match accepted {
            Accepted::Tcp(r, w) => self.run_connection(r, w, peer).await,
            Accepted::Ws(r, w) => self.run_connection(r, w, peer).await,
        }
    }

    async fn run_connection<R, W>(self: Arc<Self>, mut reader: R, writer: W, peer: std::net::SocketAddr)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + RequiresFullWrite + Unpin + Send + 'static,
    {
        let (session, queues) = Session::new(Some(peer));
        let writer_task = tokio::spawn(Self::write_loop(self.clone(), session.clone(), writer, queues));

        let outcome = match self.auth_phase(&mut reader, &session).await {
            Ok(()) => self.read_loop(&mut reader, &session).await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            tracing::info!(error = %e, "session closed");
        }

        session.close().await;
        let _ = writer_task.await;

        // Invoked unconditionally — whether or not the session ever reached
        // registration — mirroring the original source's deferred
        // `channel.Close(); srv.opts.Handler.OnClose(channel)` pair in
        // `server/server.go`'s connection goroutine. This is distinct from
        // `Session`'s own `on_close` field, which only ever holds the
        // registry-cleanup hook installed at successful auth.
        self.handler.on_close(&session).await;
    }

    /// Wraps a single frame decode in `options.read_timeout`, if configured.
    /// `None` disables the deadline, matching the original's `ReadTimeout ==
    /// 0` convention.
    async fn decode_with_timeout<R>(&self, reader: &mut R) -> Result<Message>
    where
        R: AsyncRead + Unpin,
    {
        match self.options.read_timeout {
            Some(d) => tokio::time::timeout(d, Message::decode(reader))
                .await
                .unwrap_or_else(|_| Err(io_timeout("read").into())),
            None => Message::decode(reader).await,
        }
    }

    /// Races a 10s (default) timer against `Auth` frame decode. Any non-
    /// `Auth` cmd, a rejected reply, or the timer firing first all end the
    /// same way: return an error without registering the session.
    async fn auth_phase<R>(&self, reader: &mut R, session: &Arc<Session>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let timer = tokio::time::sleep(self.options.auth_timeout);
        tokio::pin!(timer);

        tokio::select! {
            biased;
            _ = &mut timer => Err(CmError::AuthTimeout),
            frame = self.decode_with_timeout(reader) => {
                let frame = frame?;
                if frame.cmd() != Cmd::Auth {
                    return Err(CmError::Auth(format!("expected Auth, got {:?}", frame.cmd())));
                }

                let reply = self.handler.on_auth(frame.body()).await;

                let mut ack = self.pool.acquire();
                ack.set_cmd(Cmd::Auth)
                    .set_request_id(frame.request_id())
                    .set_body(reply.data);
                session.enter_out_msg(ack).await;

                if !reply.ok {
                    return Err(CmError::Auth(
                        reply.err.unwrap_or_else(|| "auth rejected".to_string()),
                    ));
                }

                assert!(
                    !reply.channel_id.is_empty(),
                    "Handler::on_auth returned ok=true with an empty channel_id"
                );

                session.set_identity(reply.room_id.clone(), reply.channel_id.clone());
                session.set_metadata(reply.metadata).await;
                self.register(session.clone(), reply.room_id, reply.channel_id).await;
                Ok(())
            }
        }
    }

    /// Installs the registry-cleanup `on_close` hook, adds the session to
    /// the broadcast set, then installs it in its room — closing whatever
    /// session it displaced. Order matters: the hook must be in place
    /// *before* the session becomes reachable from the registry, and the
    /// evicted predecessor is closed only *after* its successor already
    /// occupies the slot (see `SPEC_FULL.md` §5's replacement-safety note).
    async fn register(&self, session: Arc<Session>, room_id: String, channel_id: String) {
        let registry = self.registry.clone();
        let hook_room_id = room_id.clone();
        let hook_channel_id = channel_id.clone();
        session
            .set_on_close(Box::new(move |s| {
                let registry = registry.clone();
                let room_id = hook_room_id.clone();
                let channel_id = hook_channel_id.clone();
                Box::pin(async move {
                    if let Some(room) = registry.get(&room_id).await {
                        room.del_if_equal(&channel_id, &s).await;
                        registry.del_room_if_empty(&room_id).await;
                    }
                    registry.remove_from_broadcast(s.id()).await;
                })
            }))
            .await;

        self.registry.add_to_broadcast(session.clone()).await;

        let room = self.registry.get_or_create(&room_id).await;
        if let Some(evicted) = room.add_or_replace(channel_id, session).await {
            evicted.close().await;
        }
    }

    /// Steady-state loop: races a resettable heartbeat timer against frame
    /// decode. `Push` dispatches to the handler and replies; `Heartbeat`
    /// resets the timer and acks; `Close` ends the loop cleanly; anything
    /// else is a protocol violation.
    async fn read_loop<R>(&self, reader: &mut R, session: &Arc<Session>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let timer = tokio::time::sleep(self.options.heartbeat_timeout);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;
                _ = &mut timer => return Err(CmError::HeartbeatTimeout),
                frame = self.decode_with_timeout(reader) => {
                    let frame = frame?;
                    match frame.cmd() {
                        Cmd::Push => {
                            let reply_body = self.handler.on_receive(session, frame.body()).await;
                            let mut reply = self.pool.acquire();
                            reply.set_cmd(Cmd::Push)
                                .set_request_id(frame.request_id())
                                .set_body(reply_body);
                            session.enter_out_msg(reply).await;
                        }
                        Cmd::Heartbeat => {
                            timer.as_mut().reset(Instant::now() + self.options.heartbeat_timeout);
                            let mut ack = self.pool.acquire();
                            ack.set_cmd(Cmd::Heartbeat).set_request_id(frame.request_id());
                            session.enter_out_msg(ack).await;
                        }
                        Cmd::Close => return Ok(()),
                        _ => return Err(CmError::UnknownCmd(frame.cmd_raw())),
                    }
                }
            }
        }
    }

    /// The sole writer for this session's transport (see `SPEC_FULL.md`
    /// §5's writer-exclusivity invariant). Selects among server shutdown,
    /// session exit, and the two outbound queues; releases pooled messages
    /// back to the pool only after `write_to` returns.
    async fn write_loop<W>(
        self: Arc<Self>,
        session: Arc<Session>,
        mut writer: W,
        mut queues: crate::session::SessionQueues,
    ) where
        W: AsyncWrite + RequiresFullWrite + Unpin,
    {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_signal() => break,
                _ = session.closed_signal() => break,
                Some(msg) = queues.out_msg_rx.recv() => {
                    let result = match self.options.write_timeout {
                        Some(d) => tokio::time::timeout(d, msg.write_to(&mut writer))
                            .await
                            .unwrap_or_else(|_| Err(io_timeout("write").into())),
                        None => msg.write_to(&mut writer).await,
                    };
                    self.pool.release(msg);
                    if let Err(e) = result {
                        tracing::info!(error = %e, "write failed");
                        break;
                    }
                }
                Some(bytes) = queues.out_bytes_rx.recv() => {
                    let write = async {
                        writer.write_all(&bytes).await?;
                        writer.flush().await
                    };
                    let result = match self.options.write_timeout {
                        Some(d) => tokio::time::timeout(d, write)
                            .await
                            .unwrap_or_else(|_| Err(io_timeout("write"))),
                        None => write.await,
                    };
                    if let Err(e) = result {
                        tracing::info!(error = %e, "write failed");
                        break;
                    }
                }
                else => break,
            }
        }

        let _ = writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::AuthReply;
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};
    use tokio::net::TcpStream;

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn on_auth(&self, body: &[u8]) -> AuthReply {
            let text = String::from_utf8_lossy(body);
            if text == "deny" {
                return AuthReply::reject("denied by test handler");
            }
            AuthReply::ok("room-1", "chan-1").with_data(b"welcome".to_vec())
        }

        async fn on_receive(&self, _session: &Session, body: &[u8]) -> Vec<u8> {
            body.to_vec()
        }

        async fn on_close(&self, _session: &Session) {}
    }

    async fn spawn_test_server() -> (Arc<Server>, SocketAddr) {
        let server = Server::new(Arc::new(EchoHandler), Options::default());
        let listener = CmListener::bind("tcp://127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_clone = server.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = server_clone.shutdown_signal() => break,
                    accepted = listener.accept() => {
                        if let Ok((accepted, peer)) = accepted {
                            let s = server_clone.clone();
                            tokio::spawn(async move { s.serve_connection(accepted, peer).await });
                        }
                    }
                }
            }
        });
        (server, addr)
    }

    #[tokio::test]
    async fn happy_path_auth_and_echo() {
        let (_server, addr) = spawn_test_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut auth = Message::new();
        auth.set_cmd(Cmd::Auth).set_request_id(7).set_body(b"ok".to_vec());
        stream.write_all(&auth.encode()).await.unwrap();

        let reply = Message::decode(&mut stream).await.unwrap();
        assert_eq!(reply.cmd(), Cmd::Auth);
        assert_eq!(reply.request_id(), 7);
        assert_eq!(reply.body(), b"welcome");

        let mut push = Message::new();
        push.set_cmd(Cmd::Push).set_request_id(8).set_body(b"ping".to_vec());
        stream.write_all(&push.encode()).await.unwrap();

        let reply = Message::decode(&mut stream).await.unwrap();
        assert_eq!(reply.cmd(), Cmd::Push);
        assert_eq!(reply.request_id(), 8);
        assert_eq!(reply.body(), b"ping");
    }

    #[tokio::test]
    async fn rejected_auth_closes_connection() {
        let (_server, addr) = spawn_test_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut auth = Message::new();
        auth.set_cmd(Cmd::Auth).set_request_id(1).set_body(b"deny".to_vec());
        stream.write_all(&auth.encode()).await.unwrap();

        let _reply = Message::decode(&mut stream).await.unwrap();

        let mut buf = [0u8; 1];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "connection should be closed after a rejected auth");
    }

    #[tokio::test]
    async fn duplicate_channel_replacement_keeps_latest_registration() {
        let (server, addr) = spawn_test_server().await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut auth = Message::new();
        auth.set_cmd(Cmd::Auth).set_request_id(1).set_body(b"ok".to_vec());
        first.write_all(&auth.encode()).await.unwrap();
        Message::decode(&mut first).await.unwrap();

        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(&auth.encode()).await.unwrap();
        Message::decode(&mut second).await.unwrap();

        // Give the registry a moment to process the replacement and close
        // the first connection.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut buf = [0u8; 1];
        let n = first.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "the displaced session should have been closed");

        let room = server.registry().get("room-1").await.unwrap();
        assert_eq!(room.size().await, 1);
        let _ = &mut second;
    }
}
