//! Server network layer: accept loop, roster delivery and message dispatch

use crate::config::ServerConfig;
use crate::hooks::ServerHooks;
use crate::roster::Roster;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use shared::{BlockingQueue, Connection, Inbound, Message, MessageKind, NetError, Result, Role};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

struct ServerShared<T: MessageKind> {
    config: ServerConfig,
    roster: Mutex<Roster<T>>,
    hooks: Arc<dyn ServerHooks<T>>,
    inbound: Inbound<T>,
    next_id: AtomicU32,
}

/// Cloneable access to the roster, handed to hooks so they can reply
///
/// The roster lock is never held while a hook runs, so hooks may call back
/// into any method here.
pub struct ServerHandle<T: MessageKind> {
    shared: Arc<ServerShared<T>>,
}

impl<T: MessageKind> Clone for ServerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: MessageKind> ServerHandle<T> {
    fn new(config: ServerConfig, hooks: Arc<dyn ServerHooks<T>>) -> Self {
        let next_id = AtomicU32::new(config.first_connection_id);
        let roster = Mutex::new(Roster::new(config.max_connections));
        Self {
            shared: Arc::new(ServerShared {
                config,
                roster,
                hooks,
                inbound: Arc::new(BlockingQueue::new()),
                next_id,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Sends a message to one client
    ///
    /// A closed connection is removed from the roster instead, firing the
    /// disconnect hook if this call was the one that removed it.
    pub fn unicast(&self, conn: &Arc<Connection<T>>, message: Message<T>) {
        if conn.is_connected() && conn.send(message).is_ok() {
            return;
        }

        let removed = self.shared.roster.lock().remove(conn);
        if removed {
            self.shared.hooks.on_client_disconnect(conn);
        }
    }

    /// Sends a message to every client except `exclude`
    ///
    /// Dead connections found along the way are dropped from the roster and
    /// reported through the disconnect hook after the pass. An excluded
    /// connection is still checked for liveness.
    pub fn broadcast(&self, message: &Message<T>, exclude: Option<&Arc<Connection<T>>>) {
        let dead = self.shared.roster.lock().retain_live(|conn| {
            if !conn.is_connected() {
                return false;
            }
            if exclude.is_some_and(|skip| Arc::ptr_eq(skip, conn)) {
                return true;
            }
            conn.send(message.clone()).is_ok()
        });

        for conn in &dead {
            self.shared.hooks.on_client_disconnect(conn);
        }
    }

    /// Drops every closed connection without sending anything
    ///
    /// Returns how many were removed. Never called by the server itself.
    pub fn sweep_disconnected(&self) -> usize {
        let dead = self
            .shared
            .roster
            .lock()
            .retain_live(|conn| conn.is_connected());

        for conn in &dead {
            self.shared.hooks.on_client_disconnect(conn);
        }
        dead.len()
    }

    /// Number of roster entries, including dead ones not yet discovered
    pub fn connection_count(&self) -> usize {
        self.shared.roster.lock().len()
    }

    pub fn connections(&self) -> Vec<Arc<Connection<T>>> {
        self.shared.roster.lock().connections()
    }

    pub fn find(&self, id: u32) -> Option<Arc<Connection<T>>> {
        self.shared.roster.lock().find(id)
    }

    /// Number of received messages waiting for [`Server::pump`]
    pub fn pending_messages(&self) -> usize {
        self.shared.inbound.count()
    }

    /// Runs admission for a freshly accepted socket and starts its handshake
    fn admit(&self, socket: TcpStream, peer: SocketAddr) {
        if self.shared.roster.lock().is_full() {
            warn!("Refusing connection from {}: server full", peer);
            return;
        }

        let conn = Connection::new(Role::Server, Some(peer));
        if !self.shared.hooks.on_client_connect(&conn) {
            info!("Connection from {} denied", peer);
            conn.close();
            return;
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        conn.assign_id(id);
        info!("Client {} connected from {}", id, peer);

        let handle = self.clone();
        tokio::spawn(async move { handle.run_handshake(conn, socket).await });
    }

    async fn run_handshake(self, conn: Arc<Connection<T>>, socket: TcpStream) {
        if let Err(e) = socket.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for client {}: {}", conn.id(), e);
        }

        let (mut reader, mut writer) = socket.into_split();
        if let Err(e) = conn.validate(&mut reader, &mut writer).await {
            warn!("Client {} failed validation: {}", conn.id(), e);
            return;
        }

        if !self.shared.roster.lock().add(Arc::clone(&conn)) {
            warn!("Dropping client {}: server full", conn.id());
            conn.close();
            return;
        }

        info!("Client {} validated", conn.id());
        self.shared.hooks.on_client_validated(&self, &conn);
        conn.start(
            reader,
            writer,
            Arc::clone(&self.shared.inbound),
            self.shared.config.max_body_size,
        );
    }
}

async fn accept_loop<T: MessageKind>(
    handle: ServerHandle<T>,
    listener: TcpListener,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => handle.admit(socket, peer),
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
        }
    }
    debug!("Accept loop stopped");
}

/// A TCP message server
///
/// Socket I/O runs on a background thread owned by the server. Received
/// messages wait in a single queue until the application calls
/// [`pump`](Self::pump).
pub struct Server<T: MessageKind> {
    handle: ServerHandle<T>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl<T: MessageKind> Server<T> {
    pub fn new<H: ServerHooks<T>>(config: ServerConfig, hooks: H) -> Self {
        Self {
            handle: ServerHandle::new(config, Arc::new(hooks)),
            local_addr: None,
            shutdown: None,
            thread: None,
        }
    }

    /// Binds the listener and spawns the I/O thread
    pub fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Err(NetError::AlreadyRunning);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let addr = self.handle.config().bind_addr();
        let listener = runtime.block_on(TcpListener::bind(addr.as_str()))?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = self.handle.clone();
        let thread = std::thread::Builder::new()
            .name("server-io".to_string())
            .spawn(move || runtime.block_on(accept_loop(handle, listener, shutdown_rx)))?;

        info!("Server listening on {}", local_addr);
        self.local_addr = Some(local_addr);
        self.shutdown = Some(shutdown_tx);
        self.thread = Some(thread);
        Ok(())
    }

    /// Closes every connection and joins the I/O thread. Idempotent.
    ///
    /// Roster entries stay until a send or sweep discovers them.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        for conn in self.handle.connections() {
            conn.close();
        }
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if thread.join().is_err() {
            error!("Server I/O thread panicked");
        }

        self.local_addr = None;
        info!("Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Address the listener is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn handle(&self) -> &ServerHandle<T> {
        &self.handle
    }

    /// Dispatches up to `max_messages` queued messages to `on_message`.
    ///
    /// With `block` set, first waits until at least one message is queued;
    /// that wait has no timeout. Returns the number dispatched.
    pub fn pump(&self, max_messages: usize, block: bool) -> usize {
        let inbound = &self.handle.shared.inbound;
        if block {
            inbound.wait();
        }

        let mut dispatched = 0;
        while dispatched < max_messages {
            let Some(owned) = inbound.pop_front() else {
                break;
            };
            dispatched += 1;

            match owned.origin {
                Some(origin) => self
                    .handle
                    .shared
                    .hooks
                    .on_message(&self.handle, &origin, owned.message),
                None => warn!("Dropping message without origin: {}", owned.message),
            }
        }
        dispatched
    }

    pub fn unicast(&self, conn: &Arc<Connection<T>>, message: Message<T>) {
        self.handle.unicast(conn, message);
    }

    pub fn broadcast(&self, message: &Message<T>, exclude: Option<&Arc<Connection<T>>>) {
        self.handle.broadcast(message, exclude);
    }

    pub fn sweep_disconnected(&self) -> usize {
        self.handle.sweep_disconnected()
    }

    pub fn connection_count(&self) -> usize {
        self.handle.connection_count()
    }
}

impl<T: MessageKind> Drop for Server<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
