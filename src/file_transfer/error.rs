use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that end a single file-transfer session
#[derive(Error, Debug)]
pub enum TransferError {
    /// The connection failed while connecting, sending, receiving or accepting
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// The stream ended before a fixed-width or length-prefixed field was complete
    #[error("framing error while reading {field}: {source}")]
    Framing {
        field: &'static str,
        #[source]
        source: io::Error,
    },

    /// A request header arrived complete but carried an unusable value
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no such file {name:?} on the server")]
    RemoteFileNotFound { name: String },

    /// The payload stopped after `offset` of `total` bytes. `source` is
    /// `None` when the peer closed cleanly.
    #[error("incomplete transfer: {offset} of {total} bytes")]
    IncompleteTransfer {
        offset: u64,
        total: u64,
        #[source]
        source: Option<io::Error>,
    },

    #[error("local file error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    pub(crate) fn local(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| TransferError::LocalIo { path, source }
    }

    /// Partial progress reached before the failure, if the payload phase had started
    pub fn achieved_offset(&self) -> Option<u64> {
        match self {
            TransferError::IncompleteTransfer { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// Result type for session operations
pub type TransferResult<T> = Result<T, TransferError>;
