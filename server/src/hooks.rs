//! Application callbacks invoked by the server

use crate::network::ServerHandle;
use shared::{Connection, Message, MessageKind};
use std::sync::Arc;

/// Callbacks a server application implements
///
/// `on_client_connect` and `on_client_validated` run on the server's I/O
/// thread. `on_message` runs on whichever thread calls
/// [`Server::pump`](crate::Server::pump), and `on_client_disconnect` on the
/// thread that discovers the dead connection. Implementations synchronize
/// their own state.
pub trait ServerHooks<T: MessageKind>: Send + Sync + 'static {
    /// Admission check for a freshly accepted socket, before the handshake.
    ///
    /// The connection has no ID yet. Returning false drops the socket.
    fn on_client_connect(&self, _conn: &Arc<Connection<T>>) -> bool {
        false
    }

    /// Called once the peer answered the challenge and joined the roster
    fn on_client_validated(&self, _server: &ServerHandle<T>, _conn: &Arc<Connection<T>>) {}

    /// Called when a send or sweep finds a closed connection and removes it
    fn on_client_disconnect(&self, _conn: &Arc<Connection<T>>) {}

    fn on_message(&self, _server: &ServerHandle<T>, _conn: &Arc<Connection<T>>, _msg: Message<T>) {}
}
