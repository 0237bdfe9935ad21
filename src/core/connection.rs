//! Per-connection read and write pipelines
//!
//! # Concurrency Design
//!
//! The socket is split into independent read and write halves. The read half
//! is owned by a single read task that loops `header -> body -> dispatch`
//! until the peer goes away. The write half is driven by a write chain that
//! drains the connection's private outgoing queue.
//!
//! At most one write chain exists per connection: [`Connection::send`]
//! appends to the outgoing queue and starts a chain only if the queue was
//! empty immediately before the append. The chain pops a message only after
//! it has been fully written and stops when a pop leaves the queue empty.
//! Both checks happen under the queue lock, so a message is never picked up
//! by two chains and never stranded without one.
//!
//! Any read or write failure closes the connection. Nothing is retried and
//! undelivered outgoing messages are dropped. The owner observes the closure
//! lazily through [`Connection::is_connected`].

use crate::core::codec;
use crate::core::message::{Message, MessageKind, OwnedMessage, WIRE_BODY_LIMIT};
use crate::core::queue::ThreadSafeQueue;
use crate::error::{NetworkError, Result};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};

/// Which side of the link a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Accepted by a server; delivers messages tagged with itself
    Server,
    /// Dialed by a client; delivers messages without an origin
    Client,
}

/// One established TCP connection
pub struct Connection<T: MessageKind> {
    id: AtomicU32,
    owner: Owner,
    peer_addr: Option<SocketAddr>,
    handle: Handle,
    max_message_size: usize,
    connected: AtomicBool,
    closed_tx: watch::Sender<bool>,
    read_half: parking_lot::Mutex<Option<OwnedReadHalf>>,
    write_half: Mutex<Option<OwnedWriteHalf>>,
    outgoing: ThreadSafeQueue<Arc<Message<T>>>,
    incoming: Arc<ThreadSafeQueue<OwnedMessage<T>>>,
    self_ref: Weak<Self>,
}

impl<T: MessageKind> Connection<T> {
    /// Wrap an established stream.
    ///
    /// Pipelines run on `handle`; completed inbound messages are pushed to
    /// `incoming`. No reading happens until [`connect_to_client`] or
    /// [`connect_to_server`] is called.
    ///
    /// [`connect_to_client`]: Self::connect_to_client
    /// [`connect_to_server`]: Self::connect_to_server
    pub(crate) fn new(
        owner: Owner,
        handle: Handle,
        stream: TcpStream,
        incoming: Arc<ThreadSafeQueue<OwnedMessage<T>>>,
        max_message_size: usize,
    ) -> Arc<Self> {
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let (closed_tx, _) = watch::channel(false);

        Arc::new_cyclic(|self_ref| Self {
            id: AtomicU32::new(0),
            owner,
            peer_addr,
            handle,
            max_message_size: max_message_size.min(WIRE_BODY_LIMIT),
            connected: AtomicBool::new(true),
            closed_tx,
            read_half: parking_lot::Mutex::new(Some(read_half)),
            write_half: Mutex::new(Some(write_half)),
            outgoing: ThreadSafeQueue::new(),
            incoming,
            self_ref: self_ref.clone(),
        })
    }

    /// Connection id; 0 until a server registers it
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    /// Which side owns this connection
    #[must_use]
    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Remote address, if the socket reported one
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Whether the socket is still open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Number of messages waiting to be written
    #[must_use]
    pub fn pending_outgoing(&self) -> usize {
        self.outgoing.count()
    }

    /// Assign the server-side id and start reading. Server role only.
    pub(crate) fn connect_to_client(&self, id: u32) {
        if self.owner != Owner::Server || !self.is_connected() {
            return;
        }
        self.id.store(id, Ordering::Release);
        self.start_reading();
    }

    /// Start reading from an already dialed server. Client role only.
    pub(crate) fn connect_to_server(&self) {
        if self.owner != Owner::Client || !self.is_connected() {
            return;
        }
        self.start_reading();
    }

    /// Close the socket. Outstanding reads and writes fail and unwind.
    pub fn disconnect(&self) {
        if self.is_connected() {
            tracing::debug!("[{}] Disconnecting", self.id());
            self.close();
        }
    }

    /// Queue a copy of `message` for transmission.
    ///
    /// Messages on one connection are written in the order `send` is called.
    /// Sending on a closed connection silently drops the message.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::MessageTooLarge`] if the body exceeds the
    /// configured maximum.
    pub fn send(&self, message: &Message<T>) -> Result<()> {
        if message.size() > self.max_message_size {
            return Err(NetworkError::MessageTooLarge(
                message.size(),
                self.max_message_size,
            ));
        }
        self.send_shared(Arc::new(message.clone()))
    }

    /// Queue an already shared message; used by broadcasts to avoid a copy per peer
    pub(crate) fn send_shared(&self, message: Arc<Message<T>>) -> Result<()> {
        if message.size() > self.max_message_size {
            return Err(NetworkError::MessageTooLarge(
                message.size(),
                self.max_message_size,
            ));
        }
        if !self.is_connected() {
            tracing::debug!("[{}] Dropping {} on closed connection", self.id(), message);
            return Ok(());
        }

        if self.outgoing.push_back_checked(message) {
            if let Some(this) = self.self_ref.upgrade() {
                self.handle.spawn(this.write_chain());
            }
        }
        Ok(())
    }

    fn start_reading(&self) {
        let Some(read_half) = self.read_half.lock().take() else {
            return;
        };
        if let Some(this) = self.self_ref.upgrade() {
            self.handle.spawn(this.read_chain(read_half));
        }
    }

    async fn read_chain(self: Arc<Self>, mut read_half: OwnedReadHalf) {
        let mut closed = self.closed_tx.subscribe();

        loop {
            let result = tokio::select! {
                result = codec::read_message::<T, _>(&mut read_half, self.max_message_size) => result,
                _ = closed.wait_for(|closed| *closed) => break,
            };

            match result {
                Ok(message) => self.add_to_incoming(message),
                Err(e) => {
                    tracing::warn!("[{}] Read failed: {}", self.id(), e);
                    self.close();
                    break;
                }
            }
        }
    }

    fn add_to_incoming(self: &Arc<Self>, message: Message<T>) {
        let origin = match self.owner {
            Owner::Server => Some(Arc::clone(self)),
            Owner::Client => None,
        };
        self.incoming.push_back(OwnedMessage::new(origin, message));
    }

    async fn write_chain(self: Arc<Self>) {
        let mut closed = self.closed_tx.subscribe();
        let mut guard = self.write_half.lock().await;

        let Some(write_half) = guard.as_mut() else {
            self.outgoing.clear();
            return;
        };

        loop {
            let Ok(message) = self.outgoing.front() else {
                break;
            };

            let result = tokio::select! {
                result = codec::write_message(write_half, &message, self.max_message_size) => result,
                _ = closed.wait_for(|closed| *closed) => Err(NetworkError::connection("Connection closed")),
            };

            if let Err(e) = result {
                tracing::warn!("[{}] Write failed: {}", self.id(), e);
                guard.take();
                drop(guard);
                self.close();
                self.outgoing.clear();
                return;
            }

            if self.outgoing.drop_front() == 0 {
                break;
            }
        }
    }

    fn close(&self) {
        self.connected.store(false, Ordering::Release);
        self.closed_tx.send_replace(true);

        // Release the write half now unless a write chain holds it; the chain
        // drops it itself when it observes the closure.
        if let Ok(mut write_half) = self.write_half.try_lock() {
            write_half.take();
        }
        self.read_half.lock().take();
    }
}

impl<T: MessageKind> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("owner", &self.owner)
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}
