use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::config::TransferConfig;
use crate::protocol::DEFAULT_CHUNK_SIZE;
use crate::utils;

/// Name of the file a requester wants, as raw bytes.
///
/// The name is not required to be valid UTF-8 or free of NUL bytes; it is
/// always sent with an explicit length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    pub name: Vec<u8>,
}

impl FileRequest {
    pub fn new(name: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into() }
    }

    /// Lossy rendering of the name for logs and error messages
    pub fn display_name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Answer to a [`FileRequest`]: either the exact payload length or "not found".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeHeader {
    Found(u64),
    NotFound,
}

impl SizeHeader {
    /// Sentinel written on the wire for a missing file
    pub const NOT_FOUND_SENTINEL: i64 = -1;

    /// Any negative value means not found.
    pub fn from_wire(value: i64) -> Self {
        if value < 0 {
            SizeHeader::NotFound
        } else {
            SizeHeader::Found(value as u64)
        }
    }

    /// Returns `None` for sizes that do not fit in a signed 64-bit field.
    pub fn to_wire(self) -> Option<i64> {
        match self {
            SizeHeader::Found(size) => i64::try_from(size).ok(),
            SizeHeader::NotFound => Some(Self::NOT_FOUND_SENTINEL),
        }
    }
}

/// Byte cursor over the payload phase of a session.
///
/// `offset` only moves forward and never passes `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferCursor {
    offset: u64,
    total: u64,
}

impl TransferCursor {
    pub fn new(total: u64) -> Self {
        Self { offset: 0, total }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn remaining(&self) -> u64 {
        self.total - self.offset
    }

    pub fn is_complete(&self) -> bool {
        self.offset == self.total
    }

    /// Size of the next chunk to move, bounded by what is left.
    pub fn next_chunk_len(&self, chunk_size: usize) -> usize {
        self.remaining().min(chunk_size as u64) as usize
    }

    pub fn advance(&mut self, bytes: usize) {
        let bytes = bytes as u64;
        debug_assert!(bytes <= self.remaining(), "cursor advanced past total");
        self.offset = (self.offset + bytes).min(self.total);
    }

    pub fn percentage(&self) -> f32 {
        if self.total == 0 {
            100.0
        } else {
            (self.offset as f64 / self.total as f64 * 100.0) as f32
        }
    }
}

/// Knobs shared by requester and responder sessions
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Largest payload slice moved per read/write
    pub chunk_size: usize,
    /// Limit for any single read or write on the connection
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            idle_timeout: None,
        }
    }
}

impl From<&TransferConfig> for SessionOptions {
    fn from(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Strongly typed session identifier, used to correlate log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a completed session, on either side.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    pub name: String,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferReport {
    /// Throughput in megabits per second
    pub fn mbps(&self) -> f64 {
        utils::mbps(self.bytes, self.elapsed)
    }
}
