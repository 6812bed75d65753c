// ABOUTME: Wire frame format for the RPC multiplexer: 6-byte header + opaque body
// ABOUTME: Provides length-prefixed frame read/write over any AsyncRead/AsyncWrite stream

use crate::pool::{BufferPool, PooledBuf};
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Header size in bytes: `len(2) + seq(2) + cmd(2)`.
pub const HEADER_SIZE: usize = 6;

/// Ordinal reserved for control frames (describe/ping, keepalive).
pub const CONTROL_CMD: u16 = 0xFFFF;

/// Ordinal reserved for structured error replies. A dispatcher that hits a
/// handler error sends this instead of killing the connection (REDESIGN
/// deviation from the original source's behavior, recorded in DESIGN.md);
/// the body is the UTF-8 error message.
pub const ERROR_CMD: u16 = 0xFFFE;

/// A single wire frame: a 6-byte header plus an opaque body.
///
/// Invariant F1: a writer emits exactly `len` bytes in one logical write.
/// Invariant F2: `len` must not exceed the configured read buffer size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: u16,
    pub cmd: u16,
    pub body: BytesMut,
}

impl Frame {
    pub fn new(seq: u16, cmd: u16, body: BytesMut) -> Self {
        Frame { seq, cmd, body }
    }

    /// Total on-wire length including the header.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    pub fn is_control(&self) -> bool {
        self.cmd == CONTROL_CMD
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame length {len} exceeds read buffer size {max}")]
    HeaderTooLong { len: usize, max: usize },
    #[error("connection closed mid-frame")]
    ShortRead,
    #[error("declared frame length {0} is smaller than the header size")]
    LengthUnderflow(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

enum FillResult {
    Eof,
    Filled,
}

/// Like `AsyncReadExt::read_exact`, but distinguishes "zero bytes read,
/// clean EOF between frames" from "partial frame, peer hung up mid-write".
async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<FillResult>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(FillResult::Eof)
            } else {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read"))
            };
        }
        filled += n;
    }
    Ok(FillResult::Filled)
}

/// Reads a single frame from `reader`, peeking the 2-byte length prefix
/// before allocating a buffer sized to the declared frame length.
///
/// Returns `Ok(None)` on a clean EOF between frames (no bytes read at all).
pub async fn read_frame<R>(
    reader: &mut R,
    read_buffer_size: usize,
) -> Result<Option<Frame>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    match read_exact_or_eof(reader, &mut len_buf).await? {
        FillResult::Eof => return Ok(None),
        FillResult::Filled => {}
    }
    let len = u16::from_be_bytes(len_buf) as usize;
    if len > read_buffer_size {
        return Err(FrameError::HeaderTooLong {
            len,
            max: read_buffer_size,
        });
    }
    if len < HEADER_SIZE {
        return Err(FrameError::LengthUnderflow(len));
    }

    // `len` covers the whole frame including the 2 bytes already consumed.
    let mut rest = BytesMut::zeroed(len - 2);
    reader.read_exact(&mut rest).await.map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => FrameError::ShortRead,
        _ => FrameError::Io(e),
    })?;

    let seq = rest.get_u16();
    let cmd = rest.get_u16();
    // `Buf::get_u16` on `BytesMut` advances the internal cursor in place;
    // whatever remains *is* the body, no further copy needed.
    Ok(Some(Frame::new(seq, cmd, rest)))
}

/// Serializes `(seq, cmd, body)` into a single pooled scratch buffer and
/// writes it to `writer` in one logical write, then releases the buffer
/// back to `pool`.
///
/// A buffer obtained from `pool` is exclusively owned by this function
/// until the write completes (or fails); it is released exactly once, on
/// every path, via `PooledBuf`'s `Drop` impl.
pub async fn write_frame<W>(
    writer: &mut W,
    pool: &BufferPool,
    seq: u16,
    cmd: u16,
    body: &[u8],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut scratch: PooledBuf = pool.acquire();
    scratch.clear();
    let total_len = HEADER_SIZE + body.len();
    scratch.reserve(total_len);
    scratch.put_u16(total_len as u16);
    scratch.put_u16(seq);
    scratch.put_u16(cmd);
    scratch.put_slice(body);

    writer.write_all(&scratch).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trip_preserves_seq_cmd_body() {
        let pool = BufferPool::new();
        let mut wire = Vec::new();
        write_frame(&mut wire, &pool, 42, 7, b"hello").await.unwrap();

        let mut cursor = Cursor::new(wire);
        let frame = read_frame(&mut cursor, 65535).await.unwrap().unwrap();
        assert_eq!(frame.seq, 42);
        assert_eq!(frame.cmd, 7);
        assert_eq!(&frame.body[..], b"hello");
    }

    #[tokio::test]
    async fn empty_body_round_trips() {
        let pool = BufferPool::new();
        let mut wire = Vec::new();
        write_frame(&mut wire, &pool, 1, CONTROL_CMD, b"").await.unwrap();

        let mut cursor = Cursor::new(wire);
        let frame = read_frame(&mut cursor, 65535).await.unwrap().unwrap();
        assert_eq!(frame.seq, 1);
        assert_eq!(frame.cmd, CONTROL_CMD);
        assert!(frame.body.is_empty());
        assert!(frame.is_control());
    }

    #[tokio::test]
    async fn clean_eof_between_frames_is_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor, 65535).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let pool = BufferPool::new();
        let mut wire = Vec::new();
        write_frame(&mut wire, &pool, 1, 0, &vec![0u8; 100]).await.unwrap();

        let mut cursor = Cursor::new(wire);
        let err = read_frame(&mut cursor, 32).await.unwrap_err();
        assert!(matches!(err, FrameError::HeaderTooLong { .. }));
    }

    #[tokio::test]
    async fn truncated_frame_is_short_read() {
        let pool = BufferPool::new();
        let mut wire = Vec::new();
        write_frame(&mut wire, &pool, 1, 0, b"0123456789").await.unwrap();
        wire.truncate(wire.len() - 3);

        let mut cursor = Cursor::new(wire);
        let err = read_frame(&mut cursor, 65535).await.unwrap_err();
        assert!(matches!(err, FrameError::ShortRead));
    }
}
