use std::path::Path;
use std::time::Instant;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::codec::FileTransferCodec;
use super::error::{TransferError, TransferResult};
use super::types::{FileRequest, SessionOptions, SizeHeader, TransferCursor, TransferReport};
use crate::network::transport::{Transport, with_idle_timeout};

/// Client side of a session: fetches one remote file per connection
pub struct Requester<T: Transport> {
    transport: T,
    codec: FileTransferCodec,
    options: SessionOptions,
}

impl<T: Transport> Requester<T> {
    pub fn new(transport: T, options: SessionOptions) -> Self {
        Self {
            transport,
            codec: FileTransferCodec::new(),
            options,
        }
    }

    /// Connect to `addr` and copy `remote_name` into `destination`.
    ///
    /// A name the responder could never accept fails with `InvalidRequest`
    /// before any connection is made.
    pub async fn fetch(
        &self,
        addr: &str,
        remote_name: impl Into<Vec<u8>>,
        destination: &Path,
    ) -> TransferResult<TransferReport> {
        self.fetch_with_progress(addr, remote_name, destination, |_| {})
            .await
    }

    /// Like [`fetch`](Self::fetch), calling `progress` after every payload chunk
    pub async fn fetch_with_progress<P>(
        &self,
        addr: &str,
        remote_name: impl Into<Vec<u8>>,
        destination: &Path,
        progress: P,
    ) -> TransferResult<TransferReport>
    where
        P: FnMut(&TransferCursor) + Send,
    {
        let request = FileRequest::new(remote_name);
        self.codec.check_request(&request)?;
        let mut stream = self
            .transport
            .connect(addr)
            .await
            .map_err(TransferError::Transport)?;

        let result = receive_file(
            &mut stream,
            &self.codec,
            &request,
            destination,
            &self.options,
            progress,
        )
        .await;

        if let Err(e) = stream.shutdown().await {
            debug!("Error closing connection to {}: {}", addr, e);
        }
        result
    }
}

/// Run the requester half of a session over an already connected stream.
///
/// The destination is only created once the responder has announced a size,
/// so a not-found answer leaves the local filesystem untouched. After an
/// incomplete payload the bytes received so far stay in the destination.
pub async fn receive_file<S, P>(
    stream: &mut S,
    codec: &FileTransferCodec,
    request: &FileRequest,
    destination: &Path,
    options: &SessionOptions,
    mut progress: P,
) -> TransferResult<TransferReport>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    P: FnMut(&TransferCursor) + Send,
{
    let name = request.display_name();
    let started = Instant::now();

    with_idle_timeout(options.idle_timeout, codec.write_request(stream, request)).await?;
    debug!("Requested {:?}", name);

    let total = match with_idle_timeout(options.idle_timeout, codec.read_size(stream)).await? {
        SizeHeader::Found(size) => size,
        SizeHeader::NotFound => return Err(TransferError::RemoteFileNotFound { name }),
    };
    info!("Receiving {:?}: {} bytes", name, total);

    let mut file = File::create(destination)
        .await
        .map_err(TransferError::local(destination))?;

    let mut cursor = TransferCursor::new(total);
    let mut buffer = vec![0u8; options.chunk_size.max(1)];

    while !cursor.is_complete() {
        let len = cursor.next_chunk_len(buffer.len());
        let read = with_idle_timeout(options.idle_timeout, async {
            stream
                .read(&mut buffer[..len])
                .await
                .map_err(TransferError::Transport)
        })
        .await;

        let (n, source) = match read {
            Ok(0) => {
                warn!("Connection closed at {} of {} bytes", cursor.offset(), total);
                (0, None)
            }
            Ok(n) => (n, None),
            Err(TransferError::Transport(e)) => {
                warn!("Receive failed at {} of {} bytes: {}", cursor.offset(), total, e);
                (0, Some(e))
            }
            Err(e) => return Err(e),
        };
        if n == 0 {
            // keep what already arrived on disk
            file.flush().await.map_err(TransferError::local(destination))?;
            return Err(TransferError::IncompleteTransfer {
                offset: cursor.offset(),
                total,
                source,
            });
        }

        file.write_all(&buffer[..n])
            .await
            .map_err(TransferError::local(destination))?;
        cursor.advance(n);
        progress(&cursor);
    }

    file.flush().await.map_err(TransferError::local(destination))?;

    Ok(TransferReport {
        name,
        bytes: cursor.offset(),
        elapsed: started.elapsed(),
    })
}
