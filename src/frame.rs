//! The wire frame: a fixed 20-byte big-endian header followed by a variable
//! body. See `SPEC_FULL.md` §3/§4.1.

use crate::error::{CmError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAGIC_NUMBER: u32 = 0x08;
pub const HEADER_LEN: u32 = 20;
pub const MAX_BODY_LEN: u32 = 2 * 1024 * 1024;

/// Frame command. A closed set — any value outside this set is a protocol
/// error (`UnknownCmd`), not a silently-ignored default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Cmd {
    Unknown = 0,
    Auth = 1,
    Push = 2,
    Heartbeat = 3,
    Close = 4,
    ServerPush = 5,
}

impl Cmd {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Cmd {
    type Error = CmError;

    fn try_from(v: u32) -> Result<Self> {
        match v {
            0 => Ok(Cmd::Unknown),
            1 => Ok(Cmd::Auth),
            2 => Ok(Cmd::Push),
            3 => Ok(Cmd::Heartbeat),
            4 => Ok(Cmd::Close),
            5 => Ok(Cmd::ServerPush),
            other => Err(CmError::UnknownCmd(other)),
        }
    }
}

/// One frame: header fields plus an owned body buffer.
///
/// `Message` is the unit exchanged between the codec and the session loops.
/// Pool-acquired messages start with `magic`/`header_len` already populated
/// (see `pool.rs`); everything else is set per-use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    magic: u32,
    header_len: u32,
    cmd: u32,
    request_id: u32,
    body: Vec<u8>,
}

impl Message {
    /// A message with the standard header populated but no cmd/body set yet.
    /// Used both for fresh construction and to reset a pool-released message.
    pub fn new() -> Self {
        Message {
            magic: MAGIC_NUMBER,
            header_len: HEADER_LEN,
            cmd: 0,
            request_id: 0,
            body: Vec::new(),
        }
    }

    pub fn cmd(&self) -> Cmd {
        // Constructed only through `set_cmd`/`decode`, both of which validate.
        Cmd::try_from(self.cmd).unwrap_or(Cmd::Unknown)
    }

    pub fn cmd_raw(&self) -> u32 {
        self.cmd
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn set_cmd(&mut self, cmd: Cmd) -> &mut Self {
        self.cmd = cmd.as_u32();
        self
    }

    pub fn set_request_id(&mut self, id: u32) -> &mut Self {
        self.request_id = id;
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>) -> &mut Self {
        self.body = body;
        self
    }

    /// Reset to a pool-fresh state: header defaults restored, body cleared,
    /// cmd/request_id zeroed. Called by the pool on release.
    pub(crate) fn reset(&mut self) {
        self.magic = MAGIC_NUMBER;
        self.header_len = HEADER_LEN;
        self.cmd = 0;
        self.request_id = 0;
        self.body.clear();
    }

    fn validate_header(magic: u32, header_len: u32, body_len: u32) -> Result<()> {
        if magic != MAGIC_NUMBER {
            return Err(CmError::WrongMagic);
        }
        if header_len != HEADER_LEN {
            return Err(CmError::WrongHeaderLen);
        }
        if body_len > MAX_BODY_LEN {
            return Err(CmError::BodyOverLimit);
        }
        Ok(())
    }

    /// Contiguous header+body buffer, ready to write in one call.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN as usize + self.body.len());
        out.extend_from_slice(&self.magic.to_be_bytes());
        out.extend_from_slice(&self.header_len.to_be_bytes());
        out.extend_from_slice(&self.cmd.to_be_bytes());
        out.extend_from_slice(&self.request_id.to_be_bytes());
        out.extend_from_slice(&(self.body.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Read exactly one frame from `reader`: 20-byte header, validated, then
    /// exactly `bodyLen` bytes. Short reads surface the underlying I/O error.
    pub async fn decode<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
        let mut header = [0u8; HEADER_LEN as usize];
        reader.read_exact(&mut header).await?;

        let magic = u32::from_be_bytes(header[0..4].try_into().unwrap());
        let header_len = u32::from_be_bytes(header[4..8].try_into().unwrap());
        let cmd = u32::from_be_bytes(header[8..12].try_into().unwrap());
        let request_id = u32::from_be_bytes(header[12..16].try_into().unwrap());
        let body_len = u32::from_be_bytes(header[16..20].try_into().unwrap());

        Self::validate_header(magic, header_len, body_len)?;

        let mut body = vec![0u8; body_len as usize];
        reader.read_exact(&mut body).await?;

        Ok(Message {
            magic,
            header_len,
            cmd,
            request_id,
            body,
        })
    }

    /// Write this frame to `writer`. If the writer requires full-message
    /// writes (a WebSocket sink — see `transport::RequiresFullWrite`), the
    /// header and body are emitted as a single contiguous write; otherwise
    /// header-then-body is written directly, which is safe because the
    /// underlying stream preserves ordering and the write loop is the sole
    /// writer (see `SPEC_FULL.md` §5). Always flushes before returning: a
    /// `tokio_tungstenite` sink only queues on `write_all`, it does not put
    /// bytes on the wire until `flush` is called.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + crate::transport::RequiresFullWrite,
    {
        if writer.requires_full_write() {
            let data = self.encode();
            writer.write_all(&data).await?;
        } else {
            let mut header = [0u8; HEADER_LEN as usize];
            header[0..4].copy_from_slice(&self.magic.to_be_bytes());
            header[4..8].copy_from_slice(&self.header_len.to_be_bytes());
            header[8..12].copy_from_slice(&self.cmd.to_be_bytes());
            header[12..16].copy_from_slice(&self.request_id.to_be_bytes());
            header[16..20].copy_from_slice(&(self.body.len() as u32).to_be_bytes());
            writer.write_all(&header).await?;
            writer.write_all(&self.body).await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a reply frame echoing the request's `cmd` and `requestId`, per the
/// reply-echo invariant in `SPEC_FULL.md` §8.
pub fn reply_to(request: &Message, body: Vec<u8>) -> Message {
    let mut reply = Message::new();
    reply
        .set_cmd(request.cmd())
        .set_request_id(request.request_id())
        .set_body(body);
    reply
}

/// Build a `ServerPush` frame. Server-initiated frames carry `requestId = 0`.
pub fn server_push(body: Vec<u8>) -> Message {
    let mut msg = Message::new();
    msg.set_cmd(Cmd::ServerPush).set_body(body);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trip() {
        let mut msg = Message::new();
        msg.set_cmd(Cmd::Push)
            .set_request_id(42)
            .set_body(b"hello".to_vec());

        let encoded = msg.encode();
        let mut cursor = Cursor::new(encoded);
        let decoded = Message::decode(&mut cursor).await.unwrap();

        assert_eq!(decoded.cmd(), Cmd::Push);
        assert_eq!(decoded.request_id(), 42);
        assert_eq!(decoded.body(), b"hello");
    }

    #[tokio::test]
    async fn empty_body_round_trip() {
        let mut msg = Message::new();
        msg.set_cmd(Cmd::Heartbeat).set_request_id(1);
        let encoded = msg.encode();
        let mut cursor = Cursor::new(encoded);
        let decoded = Message::decode(&mut cursor).await.unwrap();
        assert_eq!(decoded.body().len(), 0);
    }

    #[tokio::test]
    async fn wrong_magic_rejected() {
        let mut bytes = Message::new().encode();
        bytes[3] = 0xFF; // corrupt magic's low byte
        let mut cursor = Cursor::new(bytes);
        let err = Message::decode(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CmError::WrongMagic));
    }

    #[tokio::test]
    async fn wrong_header_len_rejected() {
        let mut bytes = Message::new().encode();
        bytes[7] = 21; // corrupt header_len's low byte
        let mut cursor = Cursor::new(bytes);
        let err = Message::decode(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CmError::WrongHeaderLen));
    }

    #[tokio::test]
    async fn oversize_body_rejected() {
        let mut header = [0u8; HEADER_LEN as usize];
        header[0..4].copy_from_slice(&MAGIC_NUMBER.to_be_bytes());
        header[4..8].copy_from_slice(&HEADER_LEN.to_be_bytes());
        header[8..12].copy_from_slice(&Cmd::Push.as_u32().to_be_bytes());
        header[16..20].copy_from_slice(&(MAX_BODY_LEN + 1).to_be_bytes());

        let mut cursor = Cursor::new(header.to_vec());
        let err = Message::decode(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CmError::BodyOverLimit));
    }

    #[test]
    fn cmd_roundtrips_through_u32() {
        for cmd in [
            Cmd::Unknown,
            Cmd::Auth,
            Cmd::Push,
            Cmd::Heartbeat,
            Cmd::Close,
            Cmd::ServerPush,
        ] {
            assert_eq!(Cmd::try_from(cmd.as_u32()).unwrap(), cmd);
        }
    }

    #[test]
    fn unknown_cmd_value_is_rejected() {
        let err = Cmd::try_from(99).unwrap_err();
        assert!(matches!(err, CmError::UnknownCmd(99)));
    }

    #[test]
    fn reply_echoes_cmd_and_request_id() {
        let mut req = Message::new();
        req.set_cmd(Cmd::Push).set_request_id(7).set_body(b"ping".to_vec());
        let reply = reply_to(&req, b"pong".to_vec());
        assert_eq!(reply.cmd(), Cmd::Push);
        assert_eq!(reply.request_id(), 7);
        assert_eq!(reply.body(), b"pong");
    }

    #[test]
    fn server_push_carries_request_id_zero() {
        let msg = server_push(b"hi".to_vec());
        assert_eq!(msg.cmd(), Cmd::ServerPush);
        assert_eq!(msg.request_id(), 0);
    }
}
