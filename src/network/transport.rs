use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::file_transfer::{TransferError, TransferResult};

/// A connected, reliable, ordered byte stream
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Source of inbound connections
#[async_trait]
pub trait Listener: Send + 'static {
    type Stream: ByteStream;

    async fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Connection-oriented transport the session protocol rides on.
///
/// Holding a transport value is the only setup a process needs; there is no
/// global init or cleanup step.
#[async_trait]
pub trait Transport: Send + Sync {
    type Stream: ByteStream;
    type Listener: Listener<Stream = Self::Stream>;

    async fn connect(&self, addr: &str) -> io::Result<Self::Stream>;

    async fn listen(&self, addr: SocketAddr) -> io::Result<Self::Listener>;
}

/// Plain TCP via tokio
#[derive(Debug, Clone)]
pub struct TcpTransport {
    nodelay: bool,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    pub fn with_nodelay(nodelay: bool) -> Self {
        Self { nodelay }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;
    type Listener = TcpConnectionListener;

    async fn connect(&self, addr: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(self.nodelay)?;
        debug!("Connected to {}", stream.peer_addr()?);
        Ok(stream)
    }

    async fn listen(&self, addr: SocketAddr) -> io::Result<TcpConnectionListener> {
        let inner = TcpListener::bind(addr).await?;
        Ok(TcpConnectionListener {
            inner,
            nodelay: self.nodelay,
        })
    }
}

#[derive(Debug)]
pub struct TcpConnectionListener {
    inner: TcpListener,
    nodelay: bool,
}

#[async_trait]
impl Listener for TcpConnectionListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(self.nodelay)?;
        Ok((stream, peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Run one connection operation, failing with `TimedOut` if it stalls past `limit`.
pub async fn with_idle_timeout<T, F>(limit: Option<Duration>, op: F) -> TransferResult<T>
where
    F: Future<Output = TransferResult<T>>,
{
    match limit {
        None => op.await,
        Some(limit) => match tokio::time::timeout(limit, op).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::Transport(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no progress for {:?}", limit),
            ))),
        },
    }
}

/// What the acceptance loop does after `accept` fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptErrorAction {
    /// Only the connection being accepted is lost; accept again right away
    Skip,
    /// The process is short of a resource (descriptors, buffers, memory);
    /// pause, then accept again
    Backoff,
    /// The listener itself is unusable
    Stop,
}

pub fn classify_accept_error(err: &io::Error) -> AcceptErrorAction {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => AcceptErrorAction::Skip,
        io::ErrorKind::InvalidInput
        | io::ErrorKind::PermissionDenied
        | io::ErrorKind::NotConnected
        | io::ErrorKind::Unsupported => AcceptErrorAction::Stop,
        // EMFILE, ENFILE, ENOBUFS and ENOMEM land here
        _ => AcceptErrorAction::Backoff,
    }
}
