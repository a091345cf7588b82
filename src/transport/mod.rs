//! Transport adaptors: present TCP and WebSocket connections under one
//! byte-stream contract. See `SPEC_FULL.md` §4.3.
//!
//! Each adaptor is split into an independent read half and write half at
//! construction time — mirroring both `transport/ws/conn.go`'s separate
//! `rL`/`wL` mutexes in the original source and `tokio::net::TcpStream`'s own
//! `into_split()` — so the session's reader and writer tasks can each own
//! their half without any shared lock on the hot path.

pub mod tcp;
pub mod ws;

/// A transport's declaration of whether the codec must write a frame as one
/// contiguous buffer. WebSocket binary messages are a framing boundary —
/// splitting header and body into two sends would arrive as two distinct
/// application messages on the far side — so the WS write half answers
/// `true`. Raw TCP streams preserve byte ordering regardless of how many
/// `write` calls compose a frame, so the TCP write half answers `false`.
pub trait RequiresFullWrite {
    fn requires_full_write(&self) -> bool;
}

pub use tcp::{TcpReadHalf, TcpWriteHalf};
pub use ws::{WsReadHalf, WsWriteHalf};
