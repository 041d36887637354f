//! # Message Server Library
//!
//! A TCP server for the framed message protocol defined in `shared`. The
//! server accepts sockets, validates each peer with the challenge handshake,
//! keeps a roster of validated connections and hands every received message
//! to the application through [`ServerHooks`].
//!
//! ## Threading
//!
//! [`Server::start`] binds the listener and spawns one background thread
//! running a single-threaded tokio runtime. Every socket read and write
//! happens on that thread. Received messages land in one shared queue, and
//! the application drains it by calling [`Server::pump`] from its own thread,
//! so `on_message` never runs on the I/O thread.
//!
//! ## Disconnect Detection
//!
//! A connection whose socket fails is closed immediately but stays in the
//! roster. The next [`ServerHandle::unicast`] or [`ServerHandle::broadcast`]
//! that reaches it removes it and fires `on_client_disconnect` exactly once.
//! [`ServerHandle::sweep_disconnected`] does the same pass on demand without
//! sending anything.
//!
//! ## Module Organization
//!
//! - `config`: bind address, capacity and frame limits
//! - `hooks`: the application callback trait
//! - `network`: [`Server`], [`ServerHandle`] and the accept loop
//! - `roster`: validated connections in insertion order
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{Server, ServerConfig, ServerHandle, ServerHooks};
//! use shared::{Connection, Message};
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl ServerHooks<u32> for Echo {
//!     fn on_client_connect(&self, _conn: &Arc<Connection<u32>>) -> bool {
//!         true
//!     }
//!
//!     fn on_message(&self, server: &ServerHandle<u32>, conn: &Arc<Connection<u32>>, msg: Message<u32>) {
//!         server.unicast(conn, msg);
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::new(60000), Echo);
//!     server.start()?;
//!
//!     loop {
//!         server.pump(usize::MAX, true);
//!     }
//! }
//! ```

pub mod config;
pub mod hooks;
pub mod network;
pub mod roster;

pub use config::ServerConfig;
pub use hooks::ServerHooks;
pub use network::{Server, ServerHandle};
pub use roster::Roster;
