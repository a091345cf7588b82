//! Unicast/multicast/broadcast push, layered on top of `Server`. See
//! `SPEC_FULL.md` §4.7.
//!
//! Grounded on `server/server.go`'s `Unicast`/`Multicast`/`Broadcast`/
//! `srvPushMsgBytes`: encode a `ServerPush` frame exactly once from a pooled
//! message, then fan the resulting bytes out to every matching session's
//! outbound-bytes queue.

use std::sync::Arc;

use crate::error::{CmError, Result};
use crate::frame::Cmd;
use crate::server::Server;
use crate::session::Session;

/// A push-time predicate. A session is skipped if any filter rejects it.
pub type Filter = dyn Fn(&Session) -> bool + Send + Sync;

impl Server {
    pub async fn unicast(&self, payload: Vec<u8>, room_id: &str, filters: &[&Filter]) -> Result<()> {
        let room = self
            .registry()
            .get(room_id)
            .await
            .ok_or_else(|| CmError::RoomNotFound(room_id.to_string()))?;

        let bytes = self.encode_server_push(payload);
        for (_, session) in room.snapshot().await {
            Self::deliver(&session, &bytes, filters).await;
        }
        Ok(())
    }

    pub async fn multicast(&self, payload: Vec<u8>, room_ids: &[String], filters: &[&Filter]) {
        let bytes = self.encode_server_push(payload);
        for room_id in room_ids {
            if let Some(room) = self.registry().get(room_id).await {
                for (_, session) in room.snapshot().await {
                    Self::deliver(&session, &bytes, filters).await;
                }
            }
        }
    }

    pub async fn broadcast(&self, payload: Vec<u8>, filters: &[&Filter]) {
        let bytes = self.encode_server_push(payload);
        for session in self.registry().broadcast_snapshot().await {
            Self::deliver(&session, &bytes, filters).await;
        }
    }

    async fn deliver(session: &Arc<Session>, bytes: &Arc<[u8]>, filters: &[&Filter]) {
        if filters.iter().all(|f| f(session)) {
            session.enter_out_bytes(bytes.clone()).await;
        }
    }

    /// Encode once, from a pooled message, per the encode-once discipline in
    /// `SPEC_FULL.md` §4.7. `requestId` is always `0` for server-initiated
    /// frames.
    fn encode_server_push(&self, payload: Vec<u8>) -> Arc<[u8]> {
        let mut msg = self.pool_acquire();
        msg.set_cmd(Cmd::ServerPush).set_body(payload);
        let encoded = msg.encode();
        self.pool_release(msg);
        Arc::from(encoded.into_boxed_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Message;
    use crate::handler::{AuthReply, Handler};
    use crate::server::Options;
    use async_trait::async_trait;

    struct NullHandler;

    #[async_trait]
    impl Handler for NullHandler {
        async fn on_auth(&self, _body: &[u8]) -> AuthReply {
            AuthReply::reject("no auth in this test")
        }
        async fn on_receive(&self, _session: &Session, body: &[u8]) -> Vec<u8> {
            body.to_vec()
        }
        async fn on_close(&self, _session: &Session) {}
    }

    #[tokio::test]
    async fn broadcast_with_filter_reaches_only_matching_sessions() {
        let server = Server::new(Arc::new(NullHandler), Options::default());

        let (web1, mut q_web1) = Session::new(None);
        web1.set_identity("u1".into(), "web".into());
        let (android1, mut q_android1) = Session::new(None);
        android1.set_identity("u1".into(), "android".into());
        let (web2, mut q_web2) = Session::new(None);
        web2.set_identity("u2".into(), "web".into());

        for (room_id, channel_id, session) in [
            ("u1", "web", web1.clone()),
            ("u1", "android", android1.clone()),
            ("u2", "web", web2.clone()),
        ] {
            let room = server.registry().get_or_create(room_id).await;
            room.add_or_replace(channel_id.to_string(), session).await;
        }

        let web_only: &Filter = &|s: &Session| s.channel_id() == Some("web");
        server.broadcast(b"hi".to_vec(), &[web_only]).await;

        let frame = q_web1.out_bytes_rx.recv().await.unwrap();
        let mut cursor = std::io::Cursor::new(frame.to_vec());
        let decoded = Message::decode(&mut cursor).await.unwrap();
        assert_eq!(decoded.cmd(), Cmd::ServerPush);
        assert_eq!(decoded.request_id(), 0);
        assert_eq!(decoded.body(), b"hi");

        assert!(q_android1.out_bytes_rx.try_recv().is_err());

        let frame2 = q_web2.out_bytes_rx.recv().await.unwrap();
        assert!(!frame2.is_empty());
    }

    #[tokio::test]
    async fn unicast_to_unknown_room_errors() {
        let server = Server::new(Arc::new(NullHandler), Options::default());
        let err = server.unicast(b"x".to_vec(), "nope", &[]).await.unwrap_err();
        assert!(matches!(err, CmError::RoomNotFound(_)));
    }
}
