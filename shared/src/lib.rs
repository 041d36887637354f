//! # Shared Messaging Core
//!
//! Building blocks used by both the server and the client crates: the wire
//! format, the handshake, the per-connection I/O pipeline and the queue that
//! hands completed messages to the application thread.
//!
//! ## Wire Format
//!
//! Every message is an 8-byte header followed by its body:
//!
//! ```text
//! [kind: u32][size: u32][body: size bytes]
//! ```
//!
//! Integers are host endian. There is no magic number, version or checksum;
//! both ends are expected to run the same build on the same kind of machine.
//!
//! ## Handshake
//!
//! Before any message is accepted the server sends a random 64-bit challenge
//! and the client answers with a fixed scramble of it. A peer that answers
//! wrong is dropped before the application ever sees it.
//!
//! ## Threading
//!
//! Socket I/O runs on tokio tasks inside one background thread per server or
//! client. The only structure the application thread shares with that I/O
//! thread is the [`BlockingQueue`] of inbound messages.

pub mod connection;
pub mod error;
pub mod handshake;
pub mod kind;
pub mod message;
pub mod pod;
pub mod queue;
pub mod sample;

pub use connection::{Connection, ConnectionState, Inbound, Role};
pub use error::{NetError, Result};
pub use handshake::{scramble, Handshake, HANDSHAKE_SIZE};
pub use kind::MessageKind;
pub use message::{Message, MessageHeader, OwnedMessage, COUNT_SIZE, HEADER_SIZE};
pub use pod::Pod;
pub use queue::BlockingQueue;

/// Port the sample programs listen on and connect to
pub const DEFAULT_PORT: u16 = 60000;

/// First ID handed to an accepted connection; lower values are left to the application
pub const FIRST_CONNECTION_ID: u32 = 10000;

/// Largest message body a reader accepts before treating the stream as corrupt
pub const DEFAULT_MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;
