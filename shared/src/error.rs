//! Error type shared by the server and client crates.

use thiserror::Error;

/// Shared result type.
pub type Result<T> = std::result::Result<T, NetError>;

/// Everything that can go wrong inside the framework.
///
/// Failures inside the I/O thread (handshake, mid-stream reads and writes)
/// are logged and close the connection; they only surface through this type
/// when a caller drives the operation directly.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("handshake rejected: expected {expected:#018x}, received {received:#018x}")]
    HandshakeRejected { expected: u64, received: u64 },

    #[error("unknown message kind {0}")]
    UnknownKind(u32),

    #[error("message body of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("cannot extract {needed} bytes, only {remaining} left in body")]
    Underflow { needed: usize, remaining: usize },

    #[error("sequence count {count} exceeds the {remaining} bytes in front of it")]
    BadCount { count: u64, remaining: usize },

    #[error("string field is not valid utf-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("record encoding failed: {0}")]
    Record(#[from] bincode::Error),

    #[error("connection is not connected")]
    NotConnected,

    #[error("already running")]
    AlreadyRunning,
}

impl NetError {
    /// True for errors that mean the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        match self {
            NetError::NotConnected => true,
            NetError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
