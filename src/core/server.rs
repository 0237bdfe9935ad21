//! TCP server implementation

use crate::core::connection::{Connection, Owner};
use crate::core::context::IoContext;
use crate::core::message::{
    Message, MessageKind, OwnedMessage, MAX_MESSAGE_SIZE, WIRE_BODY_LIMIT,
};
use crate::core::queue::ThreadSafeQueue;
use crate::core::registry::Registry;
use crate::error::{NetworkError, Result};
use parking_lot::RwLock;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: String,
    /// Listen backlog
    pub backlog: i32,
    /// TCP keep-alive time for accepted sockets
    pub keep_alive: Option<Duration>,
    /// Disable Nagle's algorithm on accepted sockets
    pub nodelay: bool,
    /// Largest body accepted or sent
    pub max_message_size: usize,
    /// Id given to the first approved connection
    pub first_connection_id: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:60000".to_string(),
            backlog: 1024,
            keep_alive: Some(Duration::from_secs(60)),
            nodelay: true,
            max_message_size: MAX_MESSAGE_SIZE,
            first_connection_id: 10_000,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new<S: Into<String>>(bind_address: S) -> Self {
        Self {
            bind_address: bind_address.into(),
            ..Default::default()
        }
    }

    /// Set listen backlog
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set keep-alive interval
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Set TCP_NODELAY
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Set maximum body size, capped at what a frame header can describe
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.min(WIRE_BODY_LIMIT);
        self
    }

    /// Set the first connection id
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_first_connection_id(mut self, id: u32) -> Self {
        self.first_connection_id = id;
        self
    }
}

/// Application hooks of a [`ServerInterface`]
///
/// `on_client_connect` runs on the I/O thread and must return quickly. The
/// other hooks run on whichever thread calls [`ServerInterface::update`] or
/// the send operations.
pub trait ServerHandler<T: MessageKind>: Send + Sync + 'static {
    /// Approve or deny a freshly accepted peer. Denied peers are closed.
    fn on_client_connect(&self, client: &Arc<Connection<T>>) -> bool {
        let _ = client;
        false
    }

    /// A registered peer was found dead and removed from the registry
    fn on_client_disconnect(&self, client: &Arc<Connection<T>>) {
        let _ = client;
    }

    /// One delivered message; `client` may already be closed or pruned
    fn on_message(&self, server: &ServerInterface<T>, client: &Arc<Connection<T>>, message: Message<T>) {
        let _ = (server, client, message);
    }
}

/// State shared between the server handle and its accept task
struct Shared<T: MessageKind> {
    config: ServerConfig,
    handler: Arc<dyn ServerHandler<T>>,
    incoming: Arc<ThreadSafeQueue<OwnedMessage<T>>>,
    registry: RwLock<Registry<T>>,
    next_id: AtomicU32,
}

/// TCP server: accepts peers, owns the registry, dispatches messages
pub struct ServerInterface<T: MessageKind> {
    shared: Arc<Shared<T>>,
    context: Option<IoContext>,
    local_addr: Option<SocketAddr>,
}

impl<T: MessageKind> ServerInterface<T> {
    /// Create a server listening on `port` on all IPv4 interfaces
    pub fn new(port: u16, handler: Arc<dyn ServerHandler<T>>) -> Self {
        Self::with_config(ServerConfig::new(format!("0.0.0.0:{}", port)), handler)
    }

    /// Create a server with custom configuration
    pub fn with_config(config: ServerConfig, handler: Arc<dyn ServerHandler<T>>) -> Self {
        let next_id = AtomicU32::new(config.first_connection_id);
        Self {
            shared: Arc::new(Shared {
                config,
                handler,
                incoming: Arc::new(ThreadSafeQueue::new()),
                registry: RwLock::new(Registry::new()),
                next_id,
            }),
            context: None,
            local_addr: None,
        }
    }

    /// Bind the listener, start the I/O thread and begin accepting
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidState`] if already running and
    /// [`NetworkError::Bind`] if the endpoint cannot be listened on.
    pub fn start(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Err(NetworkError::invalid_state("Server is already running"));
        }

        let addr: SocketAddr = self
            .shared
            .config
            .bind_address
            .parse()
            .map_err(|e| NetworkError::invalid_address(format!("Invalid address: {}", e)))?;

        let std_listener = bind_listener(addr, self.shared.config.backlog)
            .map_err(|e| NetworkError::bind(format!("{}: {}", addr, e)))?;
        let local_addr = std_listener.local_addr()?;

        let context = IoContext::start("netframe-server-io")?;
        let listener = {
            let _enter = context.handle().enter();
            TcpListener::from_std(std_listener)
                .map_err(|e| NetworkError::bind(format!("{}: {}", addr, e)))?
        };

        let shared = Arc::clone(&self.shared);
        let handle = context.handle().clone();
        context
            .handle()
            .spawn(async move { accept_loop(listener, shared, handle).await });

        self.context = Some(context);
        self.local_addr = Some(local_addr);
        tracing::info!("[SERVER] Started on {}", local_addr);
        Ok(())
    }

    /// Stop accepting, join the I/O thread and close every registered connection
    ///
    /// Idempotent. `on_client_disconnect` is not called for connections
    /// closed this way. Messages already in [`incoming`](Self::incoming) stay
    /// there for a final [`update`](Self::update).
    pub fn stop(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };

        // The accept task may still be registering a peer; join it first so
        // nothing lands in the registry after the drain.
        context.stop();
        for connection in self.shared.registry.write().drain() {
            connection.disconnect();
        }
        self.local_addr = None;

        tracing::info!("[SERVER] Stopped");
    }

    /// Check if the server is accepting connections
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.context.as_ref().is_some_and(IoContext::is_running)
    }

    /// Address the listener is bound to, while running
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of registered connections, including dead ones not yet pruned
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.registry.read().len()
    }

    /// Snapshot of the registry
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection<T>>> {
        self.shared.registry.read().snapshot()
    }

    /// Registered connection with the given id
    #[must_use]
    pub fn connection(&self, id: u32) -> Option<Arc<Connection<T>>> {
        self.shared.registry.read().get(id)
    }

    /// Shared incoming queue
    #[must_use]
    pub fn incoming(&self) -> &ThreadSafeQueue<OwnedMessage<T>> {
        &self.shared.incoming
    }

    /// Send to one client, pruning it if it turns out to be dead
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::MessageTooLarge`] for oversized messages.
    pub fn message_client(&self, client: &Arc<Connection<T>>, message: &Message<T>) -> Result<()> {
        if client.is_connected() {
            return client.send(message);
        }

        let removed = self.shared.registry.write().remove(client.id());
        if let Some(removed) = removed {
            tracing::info!("[{}] Removed dead connection", removed.id());
            self.shared.handler.on_client_disconnect(&removed);
        }
        Ok(())
    }

    /// Send to every live client except `except`, pruning dead ones
    ///
    /// Dead connections found during the pass are removed from the registry
    /// in one step afterwards, and `on_client_disconnect` fires once for each.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::MessageTooLarge`] for oversized messages;
    /// nothing is sent or pruned in that case.
    pub fn message_all_clients(&self, message: &Message<T>, except: Option<&Arc<Connection<T>>>) -> Result<()> {
        let max = self.shared.config.max_message_size.min(WIRE_BODY_LIMIT);
        if message.size() > max {
            return Err(NetworkError::MessageTooLarge(message.size(), max));
        }

        let shared_message = Arc::new(message.clone());
        let removed = self.shared.registry.write().for_each_live(|client| {
            if except.is_some_and(|skip| Arc::ptr_eq(skip, client)) {
                return;
            }
            if let Err(e) = client.send_shared(Arc::clone(&shared_message)) {
                tracing::warn!("[{}] Broadcast failed: {}", client.id(), e);
            }
        });

        for client in &removed {
            tracing::info!("[{}] Removed dead connection", client.id());
            self.shared.handler.on_client_disconnect(client);
        }
        Ok(())
    }

    /// Dispatch up to `max_messages` queued messages to `on_message`, oldest first
    ///
    /// With `wait` set, blocks until at least one message is queued. Messages
    /// are dispatched even if their connection has since closed or been
    /// pruned. Returns the number of messages dispatched.
    pub fn update(&self, max_messages: usize, wait: bool) -> usize {
        if wait {
            self.shared.incoming.wait();
        }

        let mut dispatched = 0;
        while dispatched < max_messages {
            let Ok(owned) = self.shared.incoming.pop_front() else {
                break;
            };

            match owned.into_parts() {
                (Some(client), message) => {
                    self.shared.handler.on_message(self, &client, message);
                    dispatched += 1;
                }
                // Only client-role connections produce these
                (None, message) => tracing::warn!("Ignoring {} without an origin", message),
            }
        }
        dispatched
    }
}

impl<T: MessageKind> Drop for ServerInterface<T> {
    fn drop(&mut self) {
        self.stop();
        // Queued messages own their connections, which in turn hold the queue
        self.shared.incoming.clear();
    }
}

fn bind_listener(addr: SocketAddr, backlog: i32) -> std::io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Apply per-socket options; failures are logged, not fatal
pub(crate) fn configure_stream(stream: &TcpStream, keep_alive: Option<Duration>, nodelay: bool) {
    if nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Failed to set TCP_NODELAY: {}", e);
        }
    }
    if let Some(time) = keep_alive {
        let keep_alive = TcpKeepalive::new().with_time(time);
        if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keep_alive) {
            tracing::warn!("Failed to set keep-alive: {}", e);
        }
    }
}

async fn accept_loop<T: MessageKind>(
    listener: TcpListener,
    shared: Arc<Shared<T>>,
    handle: tokio::runtime::Handle,
) {
    loop {
        // Re-armed after every outcome, including accept errors and denials
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                tracing::info!("[SERVER] New connection: {}", peer_addr);
                configure_stream(&stream, shared.config.keep_alive, shared.config.nodelay);

                let connection = Connection::new(
                    Owner::Server,
                    handle.clone(),
                    stream,
                    Arc::clone(&shared.incoming),
                    shared.config.max_message_size,
                );

                if shared.handler.on_client_connect(&connection) {
                    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                    connection.connect_to_client(id);
                    shared.registry.write().insert(Arc::clone(&connection));
                    tracing::info!("[{}] Connection approved", id);
                } else {
                    connection.disconnect();
                    tracing::info!("[-----] Connection denied: {}", peer_addr);
                }
            }
            Err(e) => {
                tracing::error!("[SERVER] New connection error: {}", e);
            }
        }
    }
}
