//! # Message Client Library
//!
//! The client half of the framed message protocol defined in `shared`. A
//! [`Client`] owns at most one connection to a server.
//!
//! ## Connection Lifecycle
//!
//! [`Client::connect`] resolves the host and opens the socket on the calling
//! thread, so resolution and connect failures come back as errors. The
//! handshake and all later socket I/O run on a background thread with its own
//! single-threaded tokio runtime. The server sends a challenge and the client
//! answers it automatically. Messages sent before the answer goes out are
//! held back and written afterwards in order.
//!
//! [`Client::disconnect`] closes the socket and joins the background thread.
//! It runs on drop as well.
//!
//! ## Receiving
//!
//! Received messages are queued in arrival order. [`Client::next_message`]
//! never blocks; [`Client::await_next_message`] parks the calling thread until
//! something arrives.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::Client;
//! use shared::Message;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::<u32>::new();
//!     client.connect("127.0.0.1", 60000)?;
//!
//!     let mut msg = Message::new(1u32);
//!     msg.push(42u32);
//!     client.send(msg)?;
//!
//!     let reply = client.await_next_message();
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```

pub mod network;

pub use network::Client;
