//! WebSocket transport: re-frames binary WS messages as a continuous byte
//! stream.
//!
//! Grounded on `transport/ws/conn.go` in the original source: `Read`
//! maintains a rolling reader over the most recently received binary
//! message, looping to `ReadMessage` again once it's exhausted; `Write`
//! sends the whole buffer as a single binary WS message. The split
//! sink/stream halves (`futures_util::StreamExt::split`, the same API the
//! teacher daemon uses in `ipc/mod.rs::handle_connection`) stand in for the
//! original's independent `rL`/`wL` mutexes.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use super::RequiresFullWrite;

type Ws = WebSocketStream<TcpStream>;

pub fn split(ws: Ws) -> (WsReadHalf, WsWriteHalf) {
    let (sink, stream) = futures_util::StreamExt::split(ws);
    (
        WsReadHalf {
            stream,
            buf: Vec::new(),
            pos: 0,
        },
        WsWriteHalf { sink },
    )
}

fn io_err<E: std::fmt::Display>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

pub struct WsReadHalf {
    stream: SplitStream<Ws>,
    buf: Vec<u8>,
    pos: usize,
}

impl AsyncRead for WsReadHalf {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if self.pos < self.buf.len() {
                let available = &self.buf[self.pos..];
                let n = available.len().min(out.remaining());
                out.put_slice(&available[..n]);
                self.pos += n;
                return Poll::Ready(Ok(()));
            }

            match Pin::new(&mut self.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(WsMessage::Binary(data)))) => {
                    self.buf = data;
                    self.pos = 0;
                    if self.buf.is_empty() {
                        continue;
                    }
                }
                Poll::Ready(Some(Ok(WsMessage::Close(_)))) | Poll::Ready(None) => {
                    return Poll::Ready(Ok(())); // EOF: 0 bytes read
                }
                Poll::Ready(Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_)))) => {
                    // Transparent to the byte stream; tungstenite already
                    // answers pings automatically on the write side.
                    continue;
                }
                Poll::Ready(Some(Ok(WsMessage::Text(_) | WsMessage::Frame(_)))) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "websocket connection did not send a binary message",
                    )));
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(io_err(e))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

pub struct WsWriteHalf {
    sink: SplitSink<Ws, WsMessage>,
}

impl RequiresFullWrite for WsWriteHalf {
    fn requires_full_write(&self) -> bool {
        true
    }
}

impl AsyncWrite for WsWriteHalf {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match Pin::new(&mut self.sink).poll_ready(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(io_err(e))),
            Poll::Pending => return Poll::Pending,
        }
        let len = buf.len();
        Pin::new(&mut self.sink)
            .start_send(WsMessage::Binary(buf.to_vec()))
            .map_err(io_err)?;
        Poll::Ready(Ok(len))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.sink).poll_flush(cx).map_err(io_err)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.sink).poll_close(cx).map_err(io_err)
    }
}
