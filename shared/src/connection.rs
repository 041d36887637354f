//! One socket, its handshake, and its read/write pipeline
//!
//! A [`Connection`] is shared as `Arc<Connection<T>>` between the I/O tasks
//! that drive it and whoever holds it in a roster or client. The socket halves
//! themselves are never stored here: they are moved into the reader and
//! writer tasks once the handshake has passed.
//!
//! ```text
//! Connecting (client only) -> AwaitingValidation -> Validated -> Disconnected
//!                                     \________________________/
//!                                      any I/O error or close()
//! ```

use crate::error::{NetError, Result};
use crate::handshake::Handshake;
use crate::kind::MessageKind;
use crate::message::{Message, MessageHeader, OwnedMessage, HEADER_SIZE};
use crate::queue::BlockingQueue;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

/// Inbound queue shared between a connection's reader task and its owner
pub type Inbound<T> = Arc<BlockingQueue<OwnedMessage<T>>>;

/// Which end of the socket this connection lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted by a server; issues the handshake challenge
    Server,
    /// Opened by a client; answers the challenge
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    AwaitingValidation = 1,
    Validated = 2,
    Disconnected = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::AwaitingValidation,
            2 => ConnectionState::Validated,
            _ => ConnectionState::Disconnected,
        }
    }
}

pub struct Connection<T: MessageKind> {
    id: AtomicU32,
    role: Role,
    state: AtomicU8,
    peer: Option<SocketAddr>,
    outbound_tx: mpsc::UnboundedSender<Message<T>>,
    /// Taken by the writer task when the pipeline starts
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Message<T>>>>,
    shutdown: watch::Sender<bool>,
}

impl<T: MessageKind> Connection<T> {
    pub fn new(role: Role, peer: Option<SocketAddr>) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let initial = match role {
            Role::Server => ConnectionState::AwaitingValidation,
            Role::Client => ConnectionState::Connecting,
        };

        Arc::new(Connection {
            id: AtomicU32::new(0),
            role,
            state: AtomicU8::new(initial as u8),
            peer,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown,
        })
    }

    /// Server-assigned identifier; 0 until assigned and always 0 on clients
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Relaxed)
    }

    pub fn assign_id(&self, id: u32) {
        self.id.store(id, Ordering::Relaxed);
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True until the socket has been closed for any reason
    pub fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    pub fn is_validated(&self) -> bool {
        self.state() == ConnectionState::Validated
    }

    /// Queues a message for the writer task.
    ///
    /// Messages sent before validation are held until the writer starts.
    pub fn send(&self, message: Message<T>) -> Result<()> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        self.outbound_tx
            .send(message)
            .map_err(|_| NetError::NotConnected)
    }

    /// Marks the connection dead and wakes its I/O tasks. Idempotent.
    pub fn close(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Disconnected as u8, Ordering::AcqRel);
        if previous != ConnectionState::Disconnected as u8 {
            debug!("Closing connection {} ({:?})", self.id(), self.peer);
        }
        self.shutdown.send_replace(true);
    }

    /// Resolves once the connection has been closed by either side
    pub async fn closed(&self) {
        let mut shutdown = self.shutdown.subscribe();
        closed(&mut shutdown).await;
    }

    /// Moves from one state to another unless someone closed us first
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Runs the handshake for this connection's role over the given halves.
    ///
    /// On failure the connection is closed before the error is returned, so a
    /// rejected peer never reaches `Validated`.
    pub async fn validate<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.transition(ConnectionState::Connecting, ConnectionState::AwaitingValidation);

        let mut handshake = match self.role {
            Role::Server => Handshake::server(),
            Role::Client => Handshake::client(),
        };

        let mut shutdown = self.shutdown.subscribe();
        let result = tokio::select! {
            _ = closed(&mut shutdown) => Err(NetError::NotConnected),
            result = async {
                match self.role {
                    Role::Server => handshake.challenge(reader, writer).await,
                    Role::Client => handshake.respond(reader, writer).await,
                }
            } => result,
        };

        match result {
            Ok(()) if self.transition(
                ConnectionState::AwaitingValidation,
                ConnectionState::Validated,
            ) =>
            {
                Ok(())
            }
            Ok(()) => Err(NetError::NotConnected),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Spawns the reader and writer tasks on the current runtime.
    ///
    /// Completed messages are pushed to `inbound`. Server-side messages carry
    /// this connection as their origin.
    pub fn start<R, W>(self: &Arc<Self>, reader: R, writer: W, inbound: Inbound<T>, max_body_size: u32)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Some(outbound_rx) = self.outbound_rx.lock().take() else {
            warn!("Connection {} pipeline already started", self.id());
            return;
        };

        tokio::spawn(write_loop(Arc::clone(self), outbound_rx, writer));
        tokio::spawn(read_loop(Arc::clone(self), reader, inbound, max_body_size));
    }
}

impl<T: MessageKind> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("role", &self.role)
            .field("state", &self.state())
            .field("peer", &self.peer)
            .finish()
    }
}

/// Resolves once the connection has been closed
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn read_loop<T, R>(conn: Arc<Connection<T>>, mut reader: R, inbound: Inbound<T>, max_body_size: u32)
where
    T: MessageKind,
    R: AsyncRead + Unpin,
{
    let mut shutdown = conn.shutdown.subscribe();
    let result = tokio::select! {
        _ = closed(&mut shutdown) => Ok(()),
        result = read_messages(&conn, &mut reader, &inbound, max_body_size) => result,
    };

    match result {
        Ok(()) => debug!("Reader for connection {} stopped", conn.id()),
        Err(e) if e.is_disconnect() => info!("Connection {} closed by peer", conn.id()),
        Err(e) => warn!("Read failed on connection {}: {}", conn.id(), e),
    }
    conn.close();
}

async fn read_messages<T, R>(
    conn: &Arc<Connection<T>>,
    reader: &mut R,
    inbound: &Inbound<T>,
    max_body_size: u32,
) -> Result<()>
where
    T: MessageKind,
    R: AsyncRead + Unpin,
{
    loop {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header).await?;
        let header = MessageHeader::<T>::from_bytes(header)?;

        if header.size > max_body_size {
            return Err(NetError::FrameTooLarge {
                size: header.size,
                max: max_body_size,
            });
        }

        let mut body = vec![0u8; header.size as usize];
        if !body.is_empty() {
            reader.read_exact(&mut body).await?;
        }

        let origin = match conn.role {
            Role::Server => Some(Arc::clone(conn)),
            Role::Client => None,
        };
        inbound.push_back(OwnedMessage {
            origin,
            message: Message::with_body(header.kind, body),
        });
    }
}

async fn write_loop<T, W>(
    conn: Arc<Connection<T>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message<T>>,
    mut writer: W,
) where
    T: MessageKind,
    W: AsyncWrite + Unpin,
{
    let mut shutdown = conn.shutdown.subscribe();
    let mut outbound = VecDeque::new();

    loop {
        tokio::select! {
            _ = closed(&mut shutdown) => break,
            next = outbound_rx.recv() => match next {
                Some(message) => outbound.push_back(message),
                None => break,
            },
        }

        let result = tokio::select! {
            _ = closed(&mut shutdown) => break,
            result = write_pending(&mut writer, &mut outbound_rx, &mut outbound) => result,
        };

        if let Err(e) = result {
            warn!(
                "Write failed on connection {}, dropping {} queued messages: {}",
                conn.id(),
                outbound.len(),
                e
            );
            conn.close();
            break;
        }
    }

    let _ = writer.shutdown().await;
    debug!("Writer for connection {} stopped", conn.id());
}

/// Writes queued messages until both the local queue and the channel are empty
async fn write_pending<T, W>(
    writer: &mut W,
    outbound_rx: &mut mpsc::UnboundedReceiver<Message<T>>,
    outbound: &mut VecDeque<Message<T>>,
) -> Result<()>
where
    T: MessageKind,
    W: AsyncWrite + Unpin,
{
    loop {
        while let Ok(message) = outbound_rx.try_recv() {
            outbound.push_back(message);
        }

        let Some(message) = outbound.front() else {
            return Ok(());
        };

        writer.write_all(&message.header().to_bytes()).await?;
        if !message.is_empty() {
            writer.write_all(message.body()).await?;
        }
        writer.flush().await?;
        outbound.pop_front();
    }
}
