//! Parses a scheme-tagged listen address and produces the matching
//! transport listener. See `SPEC_FULL.md` §4.3/§6.
//!
//! Grounded on `server/listener/listener.go`'s scheme dispatch
//! (`tcp|tcp4|tcp6` → `net.Listen`; `ws|wss` → the WS listener; anything
//! else fails fast) and `server/listener/ws/ws_listener.go`'s HTTP-upgrade
//! accept path.

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::error::{CmError, Result};
use crate::transport::{tcp, ws, TcpReadHalf, TcpWriteHalf, WsReadHalf, WsWriteHalf};

/// One accepted connection, still tagged by which transport produced it —
/// the server engine only needs the `ReadTransport`/`WriteTransport` bounds,
/// so this is collapsed into trait objects immediately after accept.
pub enum Accepted {
    Tcp(TcpReadHalf, TcpWriteHalf),
    Ws(WsReadHalf, WsWriteHalf),
}

enum Kind {
    /// `tcp`, `tcp4`, `tcp6`: a bare stream listener.
    Stream,
    /// `ws`: WebSocket upgrade on every accepted connection, regardless of
    /// HTTP path (the original source's default route is "/"; this
    /// implementation does not route on path since the spec assigns no
    /// meaning to a non-default path).
    WebSocket,
}

pub struct CmListener {
    tcp: TcpListener,
    kind: Kind,
}

/// `scheme://host[:port][/path]`. TLS (`wss`, or `tcp*` with a TLS config)
/// is out of scope for this crate (TLS certificate loading mechanics are an
/// external collaborator concern per `SPEC_FULL.md` §1) — `wss` is parsed
/// but rejected at bind time with a clear error instead of silently
/// downgrading to plaintext.
fn parse(addr: &str) -> Result<(Kind, String)> {
    let (scheme, rest) = addr.split_once("://").ok_or_else(|| {
        CmError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("listen address missing scheme: {addr}"),
        ))
    })?;

    let host_port = rest.split_once('/').map(|(h, _)| h).unwrap_or(rest);

    match scheme {
        "tcp" | "tcp4" | "tcp6" => Ok((Kind::Stream, host_port.to_string())),
        "ws" => Ok((Kind::WebSocket, host_port.to_string())),
        "wss" => Err(CmError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "wss:// requires TLS material, which this crate does not load — \
             terminate TLS upstream and listen on ws:// instead",
        ))),
        other => Err(CmError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsupported listener scheme: {other}"),
        ))),
    }
}

impl CmListener {
    pub async fn bind(addr: &str) -> Result<Self> {
        let (kind, host_port) = parse(addr)?;
        let tcp = TcpListener::bind(&host_port).await?;
        Ok(CmListener { tcp, kind })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    pub async fn accept(&self) -> Result<(Accepted, SocketAddr)> {
        let (stream, peer) = self.tcp.accept().await?;
        match self.kind {
            Kind::Stream => {
                let (r, w) = tcp::split(stream);
                Ok((Accepted::Tcp(r, w), peer))
            }
            Kind::WebSocket => {
                let ws_stream = tokio_tungstenite::accept_async(stream).await?;
                let (r, w) = ws::split(ws_stream);
                Ok((Accepted::Ws(r, w), peer))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_scheme() {
        let (kind, host_port) = parse("tcp://0.0.0.0:9000").unwrap();
        assert!(matches!(kind, Kind::Stream));
        assert_eq!(host_port, "0.0.0.0:9000");
    }

    #[test]
    fn parses_ws_scheme_with_path() {
        let (kind, host_port) = parse("ws://0.0.0.0:9000/ws").unwrap();
        assert!(matches!(kind, Kind::WebSocket));
        assert_eq!(host_port, "0.0.0.0:9000");
    }

    #[test]
    fn rejects_wss_without_tls() {
        assert!(parse("wss://0.0.0.0:9000").is_err());
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(parse("udp://0.0.0.0:9000").is_err());
    }
}
