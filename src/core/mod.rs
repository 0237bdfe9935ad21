//! Core networking components

pub mod client;
pub mod codec;
pub(crate) mod context;
pub mod connection;
pub mod message;
pub mod queue;
pub(crate) mod registry;
pub mod server;

pub use client::{ClientConfig, ClientInterface};
pub use connection::{Connection, Owner};
pub use message::{
    BodyValue, Message, MessageHeader, MessageKind, OwnedMessage, HEADER_SIZE, MAX_MESSAGE_SIZE,
};
pub use queue::ThreadSafeQueue;
pub use server::{ServerConfig, ServerHandler, ServerInterface};
