//! Stream transport: a thin pass-through over `tokio::net::TcpStream`.
//!
//! Grounded on `transport/tcp/conn.go` in the original source, which wraps
//! `net.Conn` and recomputes a read/write deadline from `time.Now()` before
//! every I/O call when configured. Deadlines here are enforced one layer up,
//! by wrapping whole-frame reads/writes in `tokio::time::timeout` in the
//! session loops, rather than per `poll_read`/`poll_write` call — a deadline
//! reset on every partial poll would never expire against a slow-but-live
//! peer.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::RequiresFullWrite;

pub fn split(stream: TcpStream) -> (TcpReadHalf, TcpWriteHalf) {
    let (r, w) = stream.into_split();
    (TcpReadHalf(r), TcpWriteHalf(w))
}

pub struct TcpReadHalf(OwnedReadHalf);

impl AsyncRead for TcpReadHalf {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

pub struct TcpWriteHalf(OwnedWriteHalf);

impl RequiresFullWrite for TcpWriteHalf {
    fn requires_full_write(&self) -> bool {
        false
    }
}

impl AsyncWrite for TcpWriteHalf {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}
