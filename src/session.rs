//! One live connection: transport handle, outbound queues, exit signal, and
//! an idempotent close. See `SPEC_FULL.md` §3/§4.4.
//!
//! Grounded on `server/conn.go` (bounded `outMsgQueue`/`outBytesQueue`,
//! `exitC`, `closeOnce`, `Metadata sync.Map`, `OnClose`) merged with
//! `server/channel.go` (room/channel identity) into a single Rust type, per
//! the unification called for in `SPEC_FULL.md` §3.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::Instant;

use crate::frame::Message;

/// Capacity of both outbound queues. Deliberately small: a slow or stuck
/// transport provides backpressure to producers via a blocking `send`
/// rather than letting either queue grow without bound.
pub const OUT_QUEUE_CAPACITY: usize = 4;

/// The registry-cleanup hook installed at registration time. Async because
/// unregistering touches `tokio::sync::RwLock`-guarded room/broadcast maps;
/// it runs to completion inside `close()` before `close()` returns.
pub type OnClose = Box<dyn Fn(Arc<Session>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Post-auth routing identity. `None` while the session is still in the
/// auth phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub room_id: String,
    pub channel_id: String,
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub struct Session {
    id: u64,
    peer_addr: Option<SocketAddr>,
    create_time: Instant,
    /// Set exactly once, at successful auth, before the session becomes
    /// reachable from the registry — so push filters (`Fn(&Session) -> bool`,
    /// necessarily synchronous) can read it without locking. Mirrors
    /// `server/channel.go`'s plain `roomId`/`id` fields, set once via `Init`
    /// before the channel is shared across goroutines.
    identity: OnceLock<Identity>,
    metadata: RwLock<HashMap<String, String>>,

    out_msg_tx: mpsc::Sender<Message>,
    out_bytes_tx: mpsc::Sender<Arc<[u8]>>,

    closed: AtomicBool,
    exit_notify: Notify,
    on_close: RwLock<Option<OnClose>>,
}

/// The receiving ends of a session's outbound queues, handed to the writer
/// loop at spawn time. Kept out of `Session` itself so producers (the push
/// API, the read loop) only ever see the sending halves.
pub struct SessionQueues {
    pub out_msg_rx: mpsc::Receiver<Message>,
    pub out_bytes_rx: mpsc::Receiver<Arc<[u8]>>,
}

impl Session {
    pub fn new(peer_addr: Option<SocketAddr>) -> (Arc<Session>, SessionQueues) {
        let (out_msg_tx, out_msg_rx) = mpsc::channel(OUT_QUEUE_CAPACITY);
        let (out_bytes_tx, out_bytes_rx) = mpsc::channel(OUT_QUEUE_CAPACITY);

        let session = Arc::new(Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            create_time: Instant::now(),
            identity: OnceLock::new(),
            metadata: RwLock::new(HashMap::new()),
            out_msg_tx,
            out_bytes_tx,
            closed: AtomicBool::new(false),
            exit_notify: Notify::new(),
            on_close: RwLock::new(None),
        });

        (session, SessionQueues { out_msg_rx, out_bytes_rx })
    }

    /// Stable per-process identity, used as the broadcast set's key — a
    /// substitute for Go's pointer-identity semantics (`key.(*Channel)` in
    /// `server/server.go`'s `allChannels sync.Map`).
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn create_time(&self) -> Instant {
        self.create_time
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.identity.get().map(|i| i.room_id.as_str())
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.identity.get().map(|i| i.channel_id.as_str())
    }

    /// Called once by the server engine on successful auth, before the
    /// session is registered. Registering a session with an empty
    /// `channel_id` is a programming error (see `SPEC_FULL.md` §7) and
    /// panics rather than being silently tolerated. Calling this a second
    /// time on the same session is also a programming error.
    pub fn set_identity(&self, room_id: String, channel_id: String) {
        assert!(!channel_id.is_empty(), "channel_id cannot be empty");
        self.identity
            .set(Identity { room_id, channel_id })
            .expect("set_identity called more than once on the same session");
    }

    pub async fn set_metadata(&self, metadata: HashMap<String, String>) {
        *self.metadata.write().await = metadata;
    }

    pub async fn metadata_get(&self, key: &str) -> Option<String> {
        self.metadata.read().await.get(key).cloned()
    }

    /// Installs the close hook. Must be set before the session can be
    /// registered, since `close()` invokes it unconditionally.
    pub async fn set_on_close(&self, f: OnClose) {
        *self.on_close.write().await = Some(f);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once `close()` has fired, for use in `select!` alongside
    /// socket reads/writes and timers. The `Notified` future is created
    /// before the `is_closed` check so a `close()` racing in between is
    /// never missed (the standard `tokio::sync::Notify` idiom).
    pub async fn closed_signal(&self) {
        let notified = self.exit_notify.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Best-effort enqueue of an owned reply/push message. Dropped silently
    /// if the session has already exited — a closing session is not an
    /// error for the producer.
    pub async fn enter_out_msg(self: &Arc<Self>, msg: Message) {
        if self.is_closed() {
            return;
        }
        let _ = self.out_msg_tx.send(msg).await;
    }

    /// Best-effort enqueue of a pre-encoded frame shared across many
    /// sessions (the multicast/broadcast fan-out path).
    pub async fn enter_out_bytes(self: &Arc<Self>, data: Arc<[u8]>) {
        if self.is_closed() {
            return;
        }
        let _ = self.out_bytes_tx.send(data).await;
    }

    /// Idempotent close: fires the exit signal, invokes `on_close`, and
    /// marks the session closed. Actually tearing down the transport is the
    /// caller's job (the reader/writer loops own the transport halves) —
    /// this only flips the shared state every other path observes.
    ///
    /// Runs exactly once regardless of how many callers race to invoke it
    /// — the at-most-once close invariant in `SPEC_FULL.md` §8 — because the
    /// guard below is a single atomic compare-and-swap.
    pub async fn close(self: &Arc<Self>) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if let Some(fut) = self
            .on_close
            .read()
            .await
            .as_ref()
            .map(|on_close| on_close(self.clone()))
        {
            fut.await;
        }

        self.exit_notify.notify_waiters();
        // Outbound queues are left to drain naturally: once this Arc's
        // senders are dropped alongside the session, the writer loop's
        // receivers observe channel closure and stop. Any message still
        // queued at that point is simply deallocated — it never reaches
        // `MessagePool::release`, which only ever runs on the writer-loop
        // path for messages that were actually written (SPEC_FULL.md §8's
        // pool-discipline invariant is about double-release, not about
        // every acquired message necessarily coming back).
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
