//! Wire constants for the file-transfer session.
//!
//! One session moves one file over one connection:
//!
//! ```text
//! requester -> responder   i32 name_len (big-endian)
//! requester -> responder   name_len bytes of name
//! responder -> requester   i64 size (big-endian, negative = not found)
//! responder -> requester   size bytes of payload (only when size >= 0)
//! ```
//!
//! There is no version field, checksum or end marker. The responder closes
//! the connection after the payload, or right after a negative size.

/// Width of the request length prefix
pub const NAME_LEN_WIDTH: usize = 4;

/// Width of the size header
pub const SIZE_HEADER_WIDTH: usize = 8;

/// Longest file name a responder will accept
pub const MAX_NAME_LEN: usize = 1024;

/// Default payload chunk size for both roles
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Port the responder listens on when none is configured
pub const DEFAULT_PORT: u16 = 9000;
