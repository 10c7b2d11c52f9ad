//! One accepted socket wrapped with the frame codec
//!
//! A `Connection` is shared (`Arc`) between its session task, which reads,
//! and the chat hub, which writes replies and broadcasts. Reads and writes
//! are each serialized by their own lock so a frame is never interleaved.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::{self, FrameReader, DEFAULT_MAX_FRAME_SIZE};
use crate::error::AppError;
use crate::message::Message;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Process-unique connection number, handed out in accept order
///
/// Used as the registry key and in log lines (`conn#7`). Numbers are never
/// reused while the process runs, so a stale id can't alias a new socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Take the next number from the global counter
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Per-connection limits
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// Cap on buffered bytes for one incoming frame
    pub max_frame_size: usize,
    /// Upper bound for a single write; None waits forever
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// A live client connection
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    reader: Mutex<FrameReader<BoxedReader>>,
    writer: Mutex<BoxedWriter>,
    username: OnceLock<String>,
    closing: CancellationToken,
    closed: AtomicBool,
    write_timeout: Option<Duration>,
}

impl Connection {
    /// Wrap arbitrary read/write halves
    ///
    /// `closing` is usually a child of the listener's shutdown token, so
    /// cancelling the parent closes every connection at once.
    pub fn new<R, W>(
        reader: R,
        writer: W,
        peer_addr: SocketAddr,
        options: ConnectionOptions,
        closing: CancellationToken,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);
        Self {
            id: ConnectionId::next(),
            peer_addr,
            reader: Mutex::new(FrameReader::with_max_frame_size(
                reader,
                options.max_frame_size,
            )),
            writer: Mutex::new(writer),
            username: OnceLock::new(),
            closing,
            closed: AtomicBool::new(false),
            write_timeout: options.write_timeout,
        }
    }

    /// Wrap an accepted TCP stream
    pub fn from_tcp(
        stream: TcpStream,
        peer_addr: SocketAddr,
        options: ConnectionOptions,
        closing: CancellationToken,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer, peer_addr, options, closing)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Username assigned at login, None while unauthenticated
    pub fn username(&self) -> Option<&str> {
        self.username.get().map(String::as_str)
    }

    /// Assign the username. Returns false if one was already set.
    pub fn set_username(&self, username: impl Into<String>) -> bool {
        self.username.set(username.into()).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Wait for the next message from the peer
    ///
    /// Returns `ConnectionClosed` as soon as the connection is closed, even
    /// while parked waiting for data.
    pub async fn read_message(&self) -> Result<Message, AppError> {
        if self.is_closed() {
            return Err(AppError::ConnectionClosed);
        }

        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            _ = self.closing.cancelled() => Err(AppError::ConnectionClosed),
            result = reader.read_frame() => result,
        }
    }

    /// Encode and write one message
    pub async fn write_message(&self, message: &Message) -> Result<(), AppError> {
        let frame = codec::encode(message)?;
        self.write_frame(&frame).await
    }

    /// Write one pre-encoded frame
    ///
    /// Used by broadcast to encode once for all members.
    pub async fn write_frame(&self, frame: &[u8]) -> Result<(), AppError> {
        if self.is_closed() {
            return Err(AppError::ConnectionClosed);
        }

        let mut writer = self.writer.lock().await;
        let write = async {
            match writer.write_all(frame).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };

        let result = tokio::select! {
            biased;
            _ = self.closing.cancelled() => return Err(AppError::ConnectionClosed),
            result = with_timeout(self.write_timeout, write) => result,
        };

        result.map_err(|e| {
            debug!("Write to {} failed: {}", self.id, e);
            AppError::ConnectionClosed
        })
    }

    /// Close the connection
    ///
    /// Wakes any pending read or write and shuts down the write side so the
    /// peer sees end of stream. Calling it again does nothing.
    pub async fn close(&self) {
        self.closing.cancel();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut writer = self.writer.lock().await;
        let _ = with_timeout(self.write_timeout, writer.shutdown()).await;
        debug!("Connection {} closed", self.id);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("username", &self.username.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn with_timeout<F>(limit: Option<Duration>, fut: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into())),
        None => fut.await,
    }
}
