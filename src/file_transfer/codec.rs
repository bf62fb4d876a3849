use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{TransferError, TransferResult};
use super::types::{FileRequest, SizeHeader};
use crate::protocol::{MAX_NAME_LEN, NAME_LEN_WIDTH, SIZE_HEADER_WIDTH};

/// Check a name length against `1..=max_name_len`, the range a responder accepts
fn check_name_len(len: i64, max_name_len: usize) -> TransferResult<()> {
    if len <= 0 || len as u64 > max_name_len as u64 {
        return Err(TransferError::InvalidRequest(format!(
            "name length {} outside 1..={}",
            len, max_name_len
        )));
    }
    Ok(())
}

/// Encode a request: 4-byte big-endian length followed by the raw name bytes.
///
/// Names a responder would refuse (empty or longer than [`MAX_NAME_LEN`])
/// fail here instead of on the wire.
pub fn encode_request(request: &FileRequest) -> TransferResult<Vec<u8>> {
    check_name_len(request.name.len() as i64, MAX_NAME_LEN)?;
    frame_request(request)
}

fn frame_request(request: &FileRequest) -> TransferResult<Vec<u8>> {
    let len = i32::try_from(request.name.len()).map_err(|_| {
        TransferError::InvalidRequest(format!("name of {} bytes is too long", request.name.len()))
    })?;

    let mut buf = Vec::with_capacity(NAME_LEN_WIDTH + request.name.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&request.name);
    Ok(buf)
}

/// Encode a size header as an 8-byte big-endian signed integer
pub fn encode_size(header: SizeHeader) -> TransferResult<[u8; SIZE_HEADER_WIDTH]> {
    let value = header.to_wire().ok_or_else(|| {
        TransferError::InvalidRequest(format!("{:?} does not fit a signed 64-bit size", header))
    })?;
    Ok(value.to_be_bytes())
}

fn read_failure(field: &'static str) -> impl FnOnce(io::Error) -> TransferError {
    move |source| match source.kind() {
        io::ErrorKind::UnexpectedEof => TransferError::Framing { field, source },
        _ => TransferError::Transport(source),
    }
}

/// Codec for the two session headers.
///
/// Every field is fixed-width or length-prefixed; reads never scan for a
/// delimiter and a short read is always an error.
#[derive(Debug, Clone)]
pub struct FileTransferCodec {
    max_name_len: usize,
}

impl Default for FileTransferCodec {
    fn default() -> Self {
        Self {
            max_name_len: MAX_NAME_LEN,
        }
    }
}

impl FileTransferCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_name_len(max_name_len: usize) -> Self {
        Self { max_name_len }
    }

    pub async fn read_request<T>(&self, io: &mut T) -> TransferResult<FileRequest>
    where
        T: AsyncRead + Unpin + Send,
    {
        // Read length prefix (4 bytes)
        let mut len_bytes = [0u8; NAME_LEN_WIDTH];
        io.read_exact(&mut len_bytes)
            .await
            .map_err(read_failure("request length"))?;
        let len = i32::from_be_bytes(len_bytes);
        check_name_len(len.into(), self.max_name_len)?;

        let mut name = vec![0u8; len as usize];
        io.read_exact(&mut name)
            .await
            .map_err(read_failure("request name"))?;

        Ok(FileRequest { name })
    }

    /// Reject a request this codec's peer would refuse to decode
    pub fn check_request(&self, request: &FileRequest) -> TransferResult<()> {
        check_name_len(request.name.len() as i64, self.max_name_len)
    }

    pub async fn write_request<T>(&self, io: &mut T, request: &FileRequest) -> TransferResult<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        self.check_request(request)?;
        let data = frame_request(request)?;
        io.write_all(&data).await.map_err(TransferError::Transport)?;
        io.flush().await.map_err(TransferError::Transport)?;
        Ok(())
    }

    pub async fn read_size<T>(&self, io: &mut T) -> TransferResult<SizeHeader>
    where
        T: AsyncRead + Unpin + Send,
    {
        let mut size_bytes = [0u8; SIZE_HEADER_WIDTH];
        io.read_exact(&mut size_bytes)
            .await
            .map_err(read_failure("size header"))?;
        Ok(SizeHeader::from_wire(i64::from_be_bytes(size_bytes)))
    }

    pub async fn write_size<T>(&self, io: &mut T, header: SizeHeader) -> TransferResult<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        let data = encode_size(header)?;
        io.write_all(&data).await.map_err(TransferError::Transport)?;
        io.flush().await.map_err(TransferError::Transport)?;
        Ok(())
    }
}
