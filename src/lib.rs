//! netframe
//!
//! A transport framework for building custom request/response and broadcast
//! protocols over TCP.
//!
//! ## Features
//!
//! - Length-prefixed framing: 8-byte header (kind + body length) then an opaque body
//! - Per-connection read and write pipelines with in-order delivery
//! - At most one write chain in flight per connection
//! - Thread-safe blocking queue between the I/O thread and consumer threads
//! - Server registry with broadcast and lazy pruning of dead peers
//!
//! ## Example
//!
//! ```no_run
//! use netframe::{Connection, Message, ServerHandler, ServerInterface};
//! use std::sync::Arc;
//!
//! netframe::message_kind! {
//!     pub enum Kind {
//!         Ping = 0,
//!     }
//! }
//!
//! struct Echo;
//!
//! impl ServerHandler<Kind> for Echo {
//!     fn on_client_connect(&self, _client: &Arc<Connection<Kind>>) -> bool {
//!         true
//!     }
//!
//!     fn on_message(&self, server: &ServerInterface<Kind>, client: &Arc<Connection<Kind>>, msg: Message<Kind>) {
//!         let _ = server.message_client(client, &msg);
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = ServerInterface::<Kind>::new(60000, Arc::new(Echo));
//!     server.start()?;
//!
//!     loop {
//!         server.update(usize::MAX, true);
//!     }
//! }
//! ```

pub mod core;
pub mod error;

// Re-export main types
pub use core::{
    BodyValue, ClientConfig, ClientInterface, Connection, Message, MessageHeader, MessageKind,
    Owner, OwnedMessage, ServerConfig, ServerHandler, ServerInterface, ThreadSafeQueue,
    HEADER_SIZE, MAX_MESSAGE_SIZE,
};
pub use error::{NetworkError, Result};
