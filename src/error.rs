//! Crate-wide error taxonomy.
//!
//! Mirrors the error kinds enumerated in the design: protocol violations,
//! timing violations, I/O failures, and registry lookup failures. Programming
//! errors (absent handler, empty channel id on a successful auth reply) are
//! not represented here — they panic at the call site, since they indicate
//! misuse rather than a runtime condition a caller should recover from.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CmError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wrong magic number")]
    WrongMagic,

    #[error("wrong header length")]
    WrongHeaderLen,

    #[error("body length over limit")]
    BodyOverLimit,

    #[error("unknown cmd: {0}")]
    UnknownCmd(u32),

    #[error("auth timeout")]
    AuthTimeout,

    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    #[error("auth rejected: {0}")]
    Auth(String),

    #[error("session is not authenticated")]
    NotAuthenticated,

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("the connection was closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, CmError>;
