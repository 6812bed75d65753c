// ABOUTME: Frame-level I/O over a transport stream, with read/write deadline management
// ABOUTME: Adapted from the teacher's buffered Connection (src/connection.rs) for the generic RPC frame

use crate::frame::{self, Frame, FrameError};
use crate::pool::BufferPool;
use crate::transport::Transport;
use std::time::Duration;
use tokio::io::{self, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio::time::timeout;

/// Per-connection frame I/O.
///
/// Handles length-prefixed frame reads and writes over a transport stream,
/// refreshing a caller-specified I/O deadline before every read and write
/// (spec.md section 4.4 "I/O deadline"). The deadline's sole purpose is to
/// unstick a silently dead socket; it is unconditional, not
/// progress-gated, matching the behavior the spec's source carried
/// (spec.md section 9 Open Questions notes this as a known simplification).
pub struct Connection {
    stream: BufWriter<Transport>,
    read_buffer_size: usize,
    pool: BufferPool,
}

impl Connection {
    pub fn new(transport: Transport, read_buffer_size: usize, pool: BufferPool) -> Self {
        Connection {
            stream: BufWriter::new(transport),
            read_buffer_size,
            pool,
        }
    }

    /// Reads a single frame, racing it against `io_deadline`.
    ///
    /// Returns `Ok(None)` on a clean peer-initiated shutdown between
    /// frames.
    pub async fn read_frame(&mut self, io_deadline: Duration) -> Result<Option<Frame>, FrameError> {
        match timeout(io_deadline, frame::read_frame(&mut self.stream, self.read_buffer_size)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "read deadline exceeded",
            ))),
        }
    }

    /// Writes a single frame, racing it against `io_deadline`.
    pub async fn write_frame(
        &mut self,
        io_deadline: Duration,
        seq: u16,
        cmd: u16,
        body: &[u8],
    ) -> std::io::Result<()> {
        match timeout(io_deadline, frame::write_frame(&mut self.stream, &self.pool, seq, cmd, body)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write deadline exceeded",
            )),
        }
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }

    /// Splits a transport into independent read and write halves so a
    /// reader and a writer task can make progress concurrently, neither
    /// blocking the other (spec.md section 4.4: the sender and receiver
    /// tasks must not contend on the same socket operation). The unified
    /// [`Connection`] above is for call sites that only ever do one
    /// read-then-write per turn, e.g. the server dispatcher's serve loop.
    pub fn split(transport: Transport, read_buffer_size: usize, pool: BufferPool) -> (ConnReader, ConnWriter) {
        let (read, write) = io::split(transport);
        (
            ConnReader { read, read_buffer_size },
            ConnWriter {
                write: BufWriter::new(write),
                pool,
            },
        )
    }
}

/// The read half of a split [`Connection`].
pub struct ConnReader {
    read: ReadHalf<Transport>,
    read_buffer_size: usize,
}

impl ConnReader {
    pub async fn read_frame(&mut self, io_deadline: Duration) -> Result<Option<Frame>, FrameError> {
        match timeout(io_deadline, frame::read_frame(&mut self.read, self.read_buffer_size)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "read deadline exceeded",
            ))),
        }
    }
}

/// The write half of a split [`Connection`].
pub struct ConnWriter {
    write: BufWriter<WriteHalf<Transport>>,
    pool: BufferPool,
}

impl ConnWriter {
    pub async fn write_frame(
        &mut self,
        io_deadline: Duration,
        seq: u16,
        cmd: u16,
        body: &[u8],
    ) -> std::io::Result<()> {
        match timeout(io_deadline, frame::write_frame(&mut self.write, &self.pool, seq, cmd, body)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write deadline exceeded",
            )),
        }
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.write.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr);
        let ((server, _addr), client) = tokio::try_join!(listener.accept(), client).unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (a, b) = loopback_pair().await;
        let pool = BufferPool::new();
        let mut left = Connection::new(Transport::Tcp(a), 65535, pool.clone());
        let mut right = Connection::new(Transport::Tcp(b), 65535, pool);

        left.write_frame(Duration::from_secs(1), 5, 3, b"payload")
            .await
            .unwrap();
        let frame = right
            .read_frame(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.seq, 5);
        assert_eq!(frame.cmd, 3);
        assert_eq!(&frame.body[..], b"payload");
    }

    #[tokio::test]
    async fn read_deadline_expires_on_silence() {
        let (_a, b) = loopback_pair().await;
        let pool = BufferPool::new();
        let mut right = Connection::new(Transport::Tcp(b), 65535, pool);
        let err = right
            .read_frame(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[tokio::test]
    async fn split_halves_progress_independently() {
        let (a, b) = loopback_pair().await;
        let pool = BufferPool::new();
        let (mut a_reader, mut a_writer) = Connection::split(Transport::Tcp(a), 65535, pool.clone());
        let (mut b_reader, mut b_writer) = Connection::split(Transport::Tcp(b), 65535, pool);

        // A blocked read on one half must not prevent a write on the other.
        let read_task = tokio::spawn(async move { a_reader.read_frame(Duration::from_secs(2)).await });
        b_writer.write_frame(Duration::from_secs(1), 9, 1, b"hi").await.unwrap();
        let frame = read_task.await.unwrap().unwrap().unwrap();
        assert_eq!(frame.seq, 9);
        assert_eq!(&frame.body[..], b"hi");

        a_writer.write_frame(Duration::from_secs(1), 1, 1, b"ack").await.unwrap();
        let frame = b_reader.read_frame(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(&frame.body[..], b"ack");
    }
}
