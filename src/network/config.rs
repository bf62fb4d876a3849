use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

pub use crate::protocol::DEFAULT_PORT;

/// Network configuration struct
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the responder to
    pub bind_ip: IpAddr,

    /// Port to bind to
    pub port: u16,

    /// Disable Nagle's algorithm on every connection
    pub nodelay: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            nodelay: true,
        }
    }
}

impl NetworkConfig {
    /// Create a new NetworkConfig with custom settings
    pub fn new(port: Option<u16>, bind_ip: Option<IpAddr>) -> Self {
        let mut config = Self::default();

        if let Some(p) = port {
            config.port = p;
        }

        if let Some(ip) = bind_ip {
            config.bind_ip = ip;
        }

        config
    }

    /// Get the socket address to bind to
    pub fn get_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }
}
