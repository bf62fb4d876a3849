use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::transport::{
    AcceptErrorAction, ByteStream, Listener, TcpConnectionListener, TcpTransport, Transport,
    classify_accept_error,
};
use crate::config::AppConfig;
use crate::file_transfer::{
    Responder, ResponderOutcome, SessionId, SessionOptions, TransferError, TransferResult,
};
use crate::utils::format_size;

const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(50);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// How a spawned session finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Completed,
    NotFound,
    Failed,
}

/// Counters reported when the acceptance loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub accepted: u64,
    pub completed: u64,
    pub not_found: u64,
    pub failed: u64,
    /// Sessions still running when the shutdown grace period ran out
    pub aborted: u64,
}

impl ServeSummary {
    fn record(&mut self, joined: Result<SessionStatus, JoinError>) {
        match joined {
            Ok(SessionStatus::Completed) => self.completed += 1,
            Ok(SessionStatus::NotFound) => self.not_found += 1,
            Ok(SessionStatus::Failed) => self.failed += 1,
            Err(e) if e.is_cancelled() => self.aborted += 1,
            Err(e) => {
                error!("Session task panicked: {}", e);
                self.failed += 1;
            }
        }
    }
}

/// Accepts connections and runs one independent responder session per connection
pub struct FileServer<L: Listener> {
    listener: L,
    responder: Arc<Responder>,
    shutdown_grace: Duration,
}

impl FileServer<TcpConnectionListener> {
    /// Bind a TCP listener as described by `config`.
    ///
    /// Fails if the serve root is not a directory or the address cannot be bound.
    pub async fn bind(config: &AppConfig) -> TransferResult<Self> {
        let root = &config.transfer.serve_root;
        let metadata = tokio::fs::metadata(root)
            .await
            .map_err(TransferError::local(root))?;
        if !metadata.is_dir() {
            return Err(TransferError::LocalIo {
                path: root.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "serve root is not a directory"),
            });
        }

        let transport = TcpTransport::with_nodelay(config.network.nodelay);
        let responder = Responder::new(root.clone(), SessionOptions::from(&config.transfer));
        Self::bind_with(
            &transport,
            config.network.get_socket_addr(),
            responder,
            config.transfer.shutdown_grace(),
        )
        .await
    }
}

impl<L: Listener> FileServer<L> {
    pub async fn bind_with<T>(
        transport: &T,
        addr: SocketAddr,
        responder: Responder,
        shutdown_grace: Duration,
    ) -> TransferResult<Self>
    where
        T: Transport<Listener = L>,
    {
        let listener = transport.listen(addr).await.map_err(TransferError::Transport)?;
        Ok(Self::from_listener(listener, responder, shutdown_grace))
    }

    pub fn from_listener(listener: L, responder: Responder, shutdown_grace: Duration) -> Self {
        Self {
            listener,
            responder: Arc::new(responder),
            shutdown_grace,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves or accepting fails for good.
    ///
    /// Per-session failures are logged and counted, never returned. After the
    /// loop stops, running sessions get `shutdown_grace` to finish before they
    /// are aborted.
    pub async fn run_until<F>(mut self, shutdown: F) -> TransferResult<ServeSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut sessions = JoinSet::new();
        let mut summary = ServeSummary::default();
        let mut backoff = ACCEPT_BACKOFF_START;

        if let Ok(addr) = self.listener.local_addr() {
            info!("Serving {} on {}", self.responder.root().display(), addr);
        }

        let stopped = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        backoff = ACCEPT_BACKOFF_START;
                        summary.accepted += 1;
                        let responder = Arc::clone(&self.responder);
                        sessions.spawn(run_session(responder, stream, peer));
                    }
                    Err(e) => match classify_accept_error(&e) {
                        AcceptErrorAction::Skip => {
                            warn!("Dropped incoming connection: {}", e);
                        }
                        AcceptErrorAction::Backoff => {
                            error!("accept: {}, retrying in {:?}", e, backoff);
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                        }
                        AcceptErrorAction::Stop => {
                            error!("accept: {}", e);
                            break Err(TransferError::Transport(e));
                        }
                    },
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    summary.record(joined);
                }
            }
        };

        if !sessions.is_empty() {
            info!("Waiting for {} running session(s)", sessions.len());
        }
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = sessions.join_next().await {
                summary.record(joined);
            }
        })
        .await;
        if drained.is_err() {
            warn!("Aborting {} session(s) after shutdown grace period", sessions.len());
            sessions.abort_all();
            while let Some(joined) = sessions.join_next().await {
                summary.record(joined);
            }
        }

        info!(
            accepted = summary.accepted,
            completed = summary.completed,
            not_found = summary.not_found,
            failed = summary.failed,
            aborted = summary.aborted,
            "Server stopped"
        );
        stopped.map(|()| summary)
    }
}

async fn run_session<S: ByteStream>(
    responder: Arc<Responder>,
    mut stream: S,
    peer: SocketAddr,
) -> SessionStatus {
    let span = info_span!("session", id = %SessionId::new(), %peer);
    async move {
        info!("New connection");
        let status = match responder.serve(&mut stream).await {
            Ok(ResponderOutcome::Sent(report)) => {
                info!(
                    "Sent {:?} ({}) in {:?}, speed = {:.2} Mbits/sec",
                    report.name,
                    format_size(report.bytes),
                    report.elapsed,
                    report.mbps()
                );
                SessionStatus::Completed
            }
            Ok(ResponderOutcome::NotFound { name }) => {
                info!("No such file {:?}", name);
                SessionStatus::NotFound
            }
            Err(e) => {
                warn!("Session failed: {}", e);
                SessionStatus::Failed
            }
        };

        if let Err(e) = stream.shutdown().await {
            debug!("Error closing connection: {}", e);
        }
        status
    }
    .instrument(span)
    .await
}
