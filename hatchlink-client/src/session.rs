//! Byte-stream link to the controller, framed as newline-terminated lines.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use socket2::SockRef;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};

use crate::error::{Error, Result};

/// Longest a blocked read goes without checking whether the session closed.
pub const READ_QUANTUM: Duration = Duration::from_millis(100);

/// Bound on flushing one request line.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest reply line accepted, terminator included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One open line-oriented connection.
///
/// At most one write and one read run at a time; callers pairing a request
/// with its reply must serialize the whole exchange themselves.
#[async_trait]
pub trait LinkSession: Send + Sync {
    /// Writes `line` as-is; the caller supplies the terminator.
    async fn write_line(&self, line: &str) -> Result<()>;

    /// Reads the next non-empty line, terminator stripped.
    ///
    /// Fails with [`Error::Timeout`] once `deadline` passes and with
    /// [`Error::Closed`] when the session is closed, by either side, while
    /// waiting.
    async fn read_line(&self, deadline: Instant) -> Result<String>;

    /// Closes the session. Idempotent, and unblocks a pending read.
    async fn close(&self);

    fn is_open(&self) -> bool;
}

/// Opens sessions to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint, connect_timeout: Duration)
    -> Result<Arc<dyn LinkSession>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn open(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<Arc<dyn LinkSession>> {
        let session = TcpSession::connect(endpoint, connect_timeout).await?;
        Ok(Arc::new(session))
    }
}

struct LineReader {
    reader: BufReader<OwnedReadHalf>,
    /// Bytes of a line whose terminator has not arrived yet
    pending: Vec<u8>,
}

pub struct TcpSession {
    peer: String,
    reader: Mutex<LineReader>,
    writer: Mutex<OwnedWriteHalf>,
    open: AtomicBool,
}

impl TcpSession {
    pub async fn connect(endpoint: &Endpoint, connect_timeout: Duration) -> Result<Self> {
        let address = endpoint.to_string();
        let stream = timeout(connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| Error::Timeout)??;

        Ok(Self::from_stream(stream, address))
    }

    pub fn from_stream(stream: TcpStream, peer: String) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Failed to disable Nagle on {}: {}", peer, e);
        }
        if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
            tracing::warn!("Failed to enable keep-alive on {}: {}", peer, e);
        }

        let (read_half, write_half) = stream.into_split();
        tracing::debug!("Session to {} opened", peer);

        Self {
            peer,
            reader: Mutex::new(LineReader {
                reader: BufReader::new(read_half),
                pending: Vec::new(),
            }),
            writer: Mutex::new(write_half),
            open: AtomicBool::new(true),
        }
    }

    /// Returns whether this call performed the transition.
    fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }
}

#[async_trait]
impl LinkSession for TcpSession {
    async fn write_line(&self, line: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }

        let mut writer = self.writer.lock().await;
        let written = timeout(WRITE_TIMEOUT, async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.mark_closed();
                Err(e.into())
            }
            Err(_) => {
                self.mark_closed();
                Err(Error::Timeout)
            }
        }
    }

    async fn read_line(&self, deadline: Instant) -> Result<String> {
        let mut guard = self.reader.lock().await;
        let LineReader { reader, pending } = &mut *guard;

        loop {
            if !self.is_open() {
                return Err(Error::Closed);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }

            // read_until keeps partial input in `pending` when cancelled
            let quantum = READ_QUANTUM.min(deadline - now);
            let limit = (MAX_LINE_BYTES - pending.len()) as u64;
            let mut bounded = (&mut *reader).take(limit);
            match timeout(quantum, bounded.read_until(b'\n', pending)).await {
                Err(_) => continue,
                Ok(Ok(0)) => {
                    self.mark_closed();
                    tracing::debug!("Session to {} closed by peer", self.peer);
                    return Err(Error::Closed);
                }
                Ok(Ok(_)) => {
                    if pending.last() != Some(&b'\n') {
                        if pending.len() >= MAX_LINE_BYTES {
                            self.mark_closed();
                            pending.clear();
                            tracing::warn!(
                                "Reply from {} exceeds {} bytes without a terminator",
                                self.peer,
                                MAX_LINE_BYTES
                            );
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "reply line too long",
                            )
                            .into());
                        }
                        continue;
                    }

                    let line = String::from_utf8_lossy(pending).trim().to_owned();
                    pending.clear();

                    if !line.is_empty() {
                        return Ok(line);
                    }
                }
                Ok(Err(e)) => {
                    self.mark_closed();
                    return Err(e.into());
                }
            }
        }
    }

    async fn close(&self) {
        if !self.mark_closed() {
            return;
        }

        // A writer held by an in-flight write is released when the session drops
        if let Ok(mut writer) = self.writer.try_lock() {
            if let Err(e) = writer.shutdown().await {
                tracing::trace!("Shutdown of {} failed: {}", self.peer, e);
            }
        }
        tracing::debug!("Session to {} closed", self.peer);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
