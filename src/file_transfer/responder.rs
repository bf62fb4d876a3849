use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::codec::FileTransferCodec;
use super::error::{TransferError, TransferResult};
use super::types::{FileRequest, SessionOptions, SizeHeader, TransferCursor, TransferReport};
use crate::network::transport::with_idle_timeout;

/// How a responder session ended when no error occurred
#[derive(Debug, Clone, PartialEq)]
pub enum ResponderOutcome {
    /// The whole file was streamed
    Sent(TransferReport),
    /// The not-found sentinel was sent and no payload followed
    NotFound { name: String },
}

/// Server side of a session: answers one request with one file
#[derive(Debug, Clone)]
pub struct Responder {
    root: PathBuf,
    codec: FileTransferCodec,
    options: SessionOptions,
}

impl Responder {
    pub fn new(root: impl Into<PathBuf>, options: SessionOptions) -> Self {
        Self {
            root: root.into(),
            codec: FileTransferCodec::new(),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a requested name to a path under the serve root.
    ///
    /// Absolute names and names with `..` never resolve.
    pub fn resolve(&self, name: &[u8]) -> Option<PathBuf> {
        let relative = name_to_path(name)?;
        let mut has_normal = false;
        for component in relative.components() {
            match component {
                Component::Normal(_) => has_normal = true,
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        has_normal.then(|| self.root.join(relative))
    }

    /// Run the responder half of a session over an accepted stream.
    ///
    /// A request that cannot be decoded ends the session with an error and
    /// nothing is written back.
    pub async fn serve<S>(&self, stream: &mut S) -> TransferResult<ResponderOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let timeout = self.options.idle_timeout;
        let request = with_idle_timeout(timeout, self.codec.read_request(stream)).await?;
        let name = request.display_name();
        let started = Instant::now();

        let Some((mut file, total, path)) = self.open(&request).await else {
            debug!("No such file {:?}", name);
            with_idle_timeout(timeout, self.codec.write_size(stream, SizeHeader::NotFound)).await?;
            return Ok(ResponderOutcome::NotFound { name });
        };

        with_idle_timeout(timeout, self.codec.write_size(stream, SizeHeader::Found(total))).await?;
        info!("Sending {:?}: {} bytes", name, total);

        let mut cursor = TransferCursor::new(total);
        let mut buffer = vec![0u8; self.options.chunk_size.max(1)];

        while !cursor.is_complete() {
            let len = cursor.next_chunk_len(buffer.len());
            let n = file
                .read(&mut buffer[..len])
                .await
                .map_err(TransferError::local(&path))?;
            if n == 0 {
                // file shrank after its size was announced
                return Err(TransferError::IncompleteTransfer {
                    offset: cursor.offset(),
                    total,
                    source: None,
                });
            }

            with_idle_timeout(timeout, async {
                stream
                    .write_all(&buffer[..n])
                    .await
                    .map_err(TransferError::Transport)
            })
            .await?;
            cursor.advance(n);
        }

        with_idle_timeout(timeout, async {
            stream.flush().await.map_err(TransferError::Transport)
        })
        .await?;

        Ok(ResponderOutcome::Sent(TransferReport {
            name,
            bytes: cursor.offset(),
            elapsed: started.elapsed(),
        }))
    }

    /// Open the requested file read-only, with its size. Anything that is
    /// not a readable regular file counts as missing.
    async fn open(&self, request: &FileRequest) -> Option<(File, u64, PathBuf)> {
        let path = self.resolve(&request.name)?;
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                debug!("Cannot open {}: {}", path.display(), e);
                return None;
            }
        };
        let metadata = file.metadata().await.ok()?;
        metadata.is_file().then(|| (file, metadata.len(), path))
    }
}

#[cfg(unix)]
fn name_to_path(name: &[u8]) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStrExt;
    Some(PathBuf::from(OsStr::from_bytes(name)))
}

#[cfg(not(unix))]
fn name_to_path(name: &[u8]) -> Option<PathBuf> {
    std::str::from_utf8(name)
        .ok()
        .map(|s| PathBuf::from(OsStr::new(s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn responder(root: &Path) -> Responder {
        Responder::new(root, SessionOptions::default())
    }

    #[test]
    fn test_resolve_rejects_escaping_names() {
        let responder = responder(Path::new("/srv/files"));
        assert_eq!(
            responder.resolve(b"report.txt"),
            Some(PathBuf::from("/srv/files/report.txt"))
        );
        assert_eq!(
            responder.resolve(b"./sub/report.txt"),
            Some(PathBuf::from("/srv/files/sub/report.txt"))
        );
        assert_eq!(responder.resolve(b"../etc/passwd"), None);
        assert_eq!(responder.resolve(b"sub/../../x"), None);
        assert_eq!(responder.resolve(b"/etc/passwd"), None);
        assert_eq!(responder.resolve(b"."), None);
    }

    #[tokio::test]
    async fn test_serves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("report.txt"), b"hello world")
            .await
            .unwrap();
        let (mut client, mut server) = duplex(1024);

        let codec = FileTransferCodec::new();
        codec
            .write_request(&mut client, &FileRequest::new("report.txt"))
            .await
            .unwrap();

        let outcome = responder(dir.path()).serve(&mut server).await.unwrap();
        drop(server);

        assert!(matches!(outcome, ResponderOutcome::Sent(ref r) if r.bytes == 11));
        assert_eq!(codec.read_size(&mut client).await.unwrap(), SizeHeader::Found(11));
        let mut payload = Vec::new();
        client.read_to_end(&mut payload).await.unwrap();
        assert_eq!(payload, b"hello world");
    }

    #[tokio::test]
    async fn test_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();
        let (mut client, mut server) = duplex(1024);

        let codec = FileTransferCodec::new();
        codec
            .write_request(&mut client, &FileRequest::new("nested"))
            .await
            .unwrap();

        let outcome = responder(dir.path()).serve(&mut server).await.unwrap();
        drop(server);

        assert_eq!(outcome, ResponderOutcome::NotFound { name: "nested".to_string() });
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, (-1i64).to_be_bytes());
    }

    #[tokio::test]
    async fn test_truncated_request_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, mut server) = duplex(1024);

        // length says 10 bytes, only 3 follow
        client.write_all(&10i32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        client.shutdown().await.unwrap();

        let result = responder(dir.path()).serve(&mut server).await;
        drop(server);

        assert!(matches!(result, Err(TransferError::Framing { .. })));
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
    }
}
