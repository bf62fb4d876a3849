pub mod codec;
pub mod error;
pub mod requester;
pub mod responder;
pub mod types;

// Re-exports for easier access from crate::file_transfer::{...}
pub use codec::{FileTransferCodec, encode_request, encode_size};
pub use error::{TransferError, TransferResult};
pub use requester::{Requester, receive_file};
pub use responder::{Responder, ResponderOutcome};
pub use types::{FileRequest, SessionId, SessionOptions, SizeHeader, TransferCursor, TransferReport};
