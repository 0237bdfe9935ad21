//! Error types for the framing engine

use std::io;
use thiserror::Error;

/// Result type for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Network system errors
#[derive(Debug, Error)]
pub enum NetworkError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport failure on an established connection (peer closed, reset, short read)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pop or peek on an empty queue
    #[error("Queue is empty")]
    EmptyQueue,

    /// The listening endpoint could not be set up
    #[error("Failed to listen: {0}")]
    Bind(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid state error
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Address parse or resolution error
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Message body larger than the configured maximum
    #[error("Message too large: {0} bytes (max: {1} bytes)")]
    MessageTooLarge(usize, usize),

    /// Header carried a kind the application does not define
    #[error("Unknown message kind: {0}")]
    UnknownKind(u32),

    /// Attempt to pop more bytes than the body holds
    #[error("Body underflow: needed {needed} bytes, {available} available")]
    BodyUnderflow { needed: usize, available: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl NetworkError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a bind error
    pub fn bind<S: Into<String>>(msg: S) -> Self {
        Self::Bind(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an invalid address error
    pub fn invalid_address<S: Into<String>>(msg: S) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }
}
