pub mod config;
pub mod server;
pub mod transport;

pub use config::NetworkConfig;
pub use server::{FileServer, ServeSummary};
pub use transport::{
    AcceptErrorAction, ByteStream, Listener, TcpConnectionListener, TcpTransport, Transport,
};
