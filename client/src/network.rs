//! Client network layer: one connection to one server

use log::{error, info, warn};
use shared::{
    BlockingQueue, Connection, Inbound, Message, MessageKind, NetError, Result, Role,
    DEFAULT_MAX_BODY_SIZE,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::net::TcpStream;

/// A TCP message client
///
/// Holds at most one connection. Socket I/O runs on a background thread
/// started by [`connect`](Self::connect); received messages wait in
/// [`incoming`](Self::incoming) until the application takes them.
pub struct Client<T: MessageKind> {
    connection: Option<Arc<Connection<T>>>,
    incoming: Inbound<T>,
    thread: Option<JoinHandle<()>>,
    max_body_size: u32,
}

impl<T: MessageKind> Default for Client<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MessageKind> Client<T> {
    pub fn new() -> Self {
        Self {
            connection: None,
            incoming: Arc::new(BlockingQueue::new()),
            thread: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    pub fn with_max_body_size(mut self, max_body_size: u32) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Resolves `host`, opens the socket and starts the handshake
    ///
    /// Returns whether the connection is still up right after the attempt;
    /// validation finishes in the background. Any previous connection is
    /// dropped first.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<bool> {
        self.disconnect();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let addrs: Vec<SocketAddr> = runtime
            .block_on(tokio::net::lookup_host((host, port)))
            .map_err(|e| {
                warn!("Failed to resolve {}:{}: {}", host, port, e);
                NetError::Resolve {
                    host: host.to_string(),
                    port,
                }
            })?
            .collect();

        if addrs.is_empty() {
            return Err(NetError::Resolve {
                host: host.to_string(),
                port,
            });
        }

        let stream = runtime.block_on(TcpStream::connect(addrs.as_slice()))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Could not set TCP_NODELAY: {}", e);
        }

        let conn = Connection::new(Role::Client, stream.peer_addr().ok());
        info!("Connected to {}:{}", host, port);

        let driver = {
            let conn = Arc::clone(&conn);
            let incoming = Arc::clone(&self.incoming);
            let max_body_size = self.max_body_size;
            move || runtime.block_on(drive(conn, stream, incoming, max_body_size))
        };
        let thread = std::thread::Builder::new()
            .name("client-io".to_string())
            .spawn(driver)?;

        let connected = conn.is_connected();
        self.connection = Some(conn);
        self.thread = Some(thread);
        Ok(connected)
    }

    /// Closes the socket and joins the I/O thread. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Client I/O thread panicked");
            }
            info!("Disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|conn| conn.is_connected())
    }

    /// True once the server's challenge has been answered
    pub fn is_validated(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|conn| conn.is_validated())
    }

    pub fn connection(&self) -> Option<&Arc<Connection<T>>> {
        self.connection.as_ref()
    }

    /// Queues a message for the server
    pub fn send(&self, message: Message<T>) -> Result<()> {
        match &self.connection {
            Some(conn) => conn.send(message),
            None => Err(NetError::NotConnected),
        }
    }

    /// Takes the oldest received message without blocking
    pub fn next_message(&self) -> Option<Message<T>> {
        self.incoming.pop_front().map(|owned| owned.message)
    }

    /// Blocks until a message arrives
    ///
    /// Never returns if the connection is gone and nothing is queued.
    pub fn await_next_message(&self) -> Message<T> {
        self.incoming.wait_pop_front().message
    }

    /// Like [`await_next_message`](Self::await_next_message) but gives up after `timeout`
    pub fn await_next_message_timeout(&self, timeout: Duration) -> Option<Message<T>> {
        if self.incoming.wait_timeout(timeout) {
            self.next_message()
        } else {
            None
        }
    }

    /// The queue received messages land in
    pub fn incoming(&self) -> &Inbound<T> {
        &self.incoming
    }
}

impl<T: MessageKind> Drop for Client<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Body of the I/O thread: handshake, pipeline, then park until closed
async fn drive<T: MessageKind>(
    conn: Arc<Connection<T>>,
    stream: TcpStream,
    incoming: Inbound<T>,
    max_body_size: u32,
) {
    let (mut reader, mut writer) = stream.into_split();
    if let Err(e) = conn.validate(&mut reader, &mut writer).await {
        warn!("Handshake with server failed: {}", e);
        return;
    }

    info!("Validated by server");
    conn.start(reader, writer, incoming, max_body_size);
    conn.closed().await;
}
