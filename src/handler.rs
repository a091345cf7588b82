//! The application-supplied hook set. See `SPEC_FULL.md` §1/§6.
//!
//! Grounded on `server/handler.go`'s `Handler` interface (`OnAuth`,
//! `OnReceive`, `OnClose`) and the `AuthReply` literal used throughout
//! `server/server.go`.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::session::Session;

/// The application's response to an `Auth` frame.
#[derive(Debug, Clone, Default)]
pub struct AuthReply {
    /// Whether authentication succeeded. `true` requires a non-empty
    /// `channel_id` — violating that is a programming error (see
    /// `SPEC_FULL.md` §7), not a runtime condition the engine recovers from.
    pub ok: bool,
    pub room_id: String,
    pub channel_id: String,
    /// Echoed back to the client as the `Auth` reply's body.
    pub data: Vec<u8>,
    /// Copied onto the session on success.
    pub metadata: HashMap<String, String>,
    /// If set, the engine closes the connection after enqueuing any
    /// partially-prepared reply and does not register the session.
    pub err: Option<String>,
}

impl AuthReply {
    pub fn ok(room_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        AuthReply {
            ok: true,
            room_id: room_id.into(),
            channel_id: channel_id.into(),
            ..Default::default()
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        AuthReply {
            ok: false,
            err: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The narrow application contract the server engine dispatches into.
/// Implementations must not block the calling task for long: each callback
/// runs inline on the session's read-loop task.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Synchronous (conceptually) validation of an `Auth` frame's body.
    /// `body` must not be retained past this call's return.
    async fn on_auth(&self, body: &[u8]) -> AuthReply;

    /// Handles a `Push` frame; the returned bytes become the reply body.
    /// An empty vec is a permitted (empty-body) reply.
    async fn on_receive(&self, session: &Session, body: &[u8]) -> Vec<u8>;

    /// Invoked exactly once per session, after the transport is closed and
    /// the outbound queues have stopped accepting new entries.
    async fn on_close(&self, session: &Session);
}
