pub mod config;
pub mod file_transfer;
pub mod network;
pub mod protocol;
pub mod utils;

// Re-export for easy access in tests
pub use config::AppConfig;
pub use file_transfer::{FileRequest, SizeHeader, TransferCursor, TransferError, TransferReport};
pub use network::{FileServer, TcpTransport};
