//! Server configuration

use shared::{DEFAULT_MAX_BODY_SIZE, DEFAULT_PORT, FIRST_CONNECTION_ID};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub host: String,
    /// Port to listen on; 0 lets the OS pick one
    pub port: u16,
    /// Roster capacity; sockets beyond it are refused before the admission hook
    pub max_connections: Option<usize>,
    /// Largest body a connection will read before dropping the peer
    pub max_body_size: u32,
    /// ID given to the first accepted connection
    pub first_connection_id: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_connections: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            first_connection_id: FIRST_CONNECTION_ID,
        }
    }
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
