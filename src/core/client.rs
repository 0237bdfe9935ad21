//! TCP client implementation

use crate::core::connection::{Connection, Owner};
use crate::core::context::IoContext;
use crate::core::message::{
    Message, MessageKind, OwnedMessage, MAX_MESSAGE_SIZE, WIRE_BODY_LIMIT,
};
use crate::core::queue::ThreadSafeQueue;
use crate::core::server::configure_stream;
use crate::error::{NetworkError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// TCP keep-alive time
    pub keep_alive: Option<Duration>,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
    /// Largest body accepted or sent
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keep_alive: Some(Duration::from_secs(60)),
            nodelay: true,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection timeout
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
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
}

/// TCP client owning a single outgoing connection
///
/// Inbound messages land in [`incoming`](Self::incoming), which the
/// application drains directly. They carry no origin since there is only one
/// peer.
pub struct ClientInterface<T: MessageKind> {
    config: ClientConfig,
    context: Option<IoContext>,
    connection: Option<Arc<Connection<T>>>,
    incoming: Arc<ThreadSafeQueue<OwnedMessage<T>>>,
}

impl<T: MessageKind> ClientInterface<T> {
    /// Create a new client
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Create a new client with custom configuration
    #[must_use]
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            context: None,
            connection: None,
            incoming: Arc::new(ThreadSafeQueue::new()),
        }
    }

    /// Resolve `host`, dial it and start the connection's read pipeline
    ///
    /// Blocks the calling thread until the dial completes. Must not be called
    /// from inside an async runtime.
    ///
    /// # Errors
    ///
    /// Fails if already connected, if resolution or dialing fails, or if the
    /// dial exceeds the configured timeout.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.is_connected() {
            return Err(NetworkError::invalid_state("Client is already connected"));
        }
        self.disconnect();

        let context = IoContext::start("netframe-client-io")?;
        let handle = context.handle().clone();
        let (tx, rx) = oneshot::channel();

        let target = format!("{}:{}", host, port);
        let connect_timeout = self.config.connect_timeout;
        let keep_alive = self.config.keep_alive;
        let nodelay = self.config.nodelay;
        let max_message_size = self.config.max_message_size;
        let incoming = Arc::clone(&self.incoming);

        context.handle().spawn(async move {
            let result = match timeout(connect_timeout, TcpStream::connect(target.as_str())).await {
                Err(_) => Err(NetworkError::timeout(format!("Connecting to {} timed out", target))),
                Ok(Err(e)) => Err(NetworkError::connection(format!(
                    "Failed to connect to {}: {}",
                    target, e
                ))),
                Ok(Ok(stream)) => {
                    configure_stream(&stream, keep_alive, nodelay);
                    Ok(Connection::new(
                        Owner::Client,
                        handle,
                        stream,
                        incoming,
                        max_message_size,
                    ))
                }
            };
            let _ = tx.send(result);
        });

        let connection = rx
            .blocking_recv()
            .map_err(|_| NetworkError::invalid_state("I/O context stopped while connecting"))??;

        connection.connect_to_server();
        tracing::info!("Connected to {}:{}", host, port);

        self.context = Some(context);
        self.connection = Some(connection);
        Ok(())
    }

    /// Stop the I/O thread and close the connection. Idempotent.
    pub fn disconnect(&mut self) {
        // Pipelines must be gone before closing, or an in-flight write keeps
        // its half of the socket.
        if let Some(mut context) = self.context.take() {
            context.stop();
        }
        if let Some(connection) = self.connection.take() {
            connection.disconnect();
        }
    }

    /// Check if the connection is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.is_connected())
    }

    /// Queue a message for the server
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidState`] if there is no open connection
    /// and [`NetworkError::MessageTooLarge`] for oversized messages.
    pub fn send(&self, message: &Message<T>) -> Result<()> {
        match &self.connection {
            Some(connection) if connection.is_connected() => connection.send(message),
            _ => Err(NetworkError::invalid_state("Client is not connected")),
        }
    }

    /// Queue of messages received from the server
    #[must_use]
    pub fn incoming(&self) -> &ThreadSafeQueue<OwnedMessage<T>> {
        &self.incoming
    }

    /// The underlying connection, once connected
    #[must_use]
    pub fn connection(&self) -> Option<&Arc<Connection<T>>> {
        self.connection.as_ref()
    }
}

impl<T: MessageKind> Default for ClientInterface<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MessageKind> Drop for ClientInterface<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
