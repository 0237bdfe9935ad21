//! Network message types
//!
//! A message is a fixed 8-byte header (kind + body length, both big-endian
//! `u32`) followed by an opaque body. The engine never interprets the body;
//! [`Message::push`] and [`Message::pop`] give applications a simple LIFO
//! stack of fixed-size scalars on top of it.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::core::connection::Connection;
use crate::error::{NetworkError, Result};

/// Maximum body size accepted by default (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Largest body length a header can describe
pub(crate) const WIRE_BODY_LIMIT: usize = u32::MAX as usize;

/// Header size on the wire: kind (4 bytes) + body length (4 bytes)
pub const HEADER_SIZE: usize = 8;

/// Application-defined message kind carried in every header
pub trait MessageKind: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Wire value of this kind
    fn to_wire(self) -> u32;

    /// Kind for a wire value, `None` if the value is not defined
    fn from_wire(raw: u32) -> Option<Self>;
}

impl MessageKind for u32 {
    fn to_wire(self) -> u32 {
        self
    }

    fn from_wire(raw: u32) -> Option<Self> {
        Some(raw)
    }
}

/// Declare a `#[repr(u32)]` enum usable as a [`MessageKind`].
///
/// ```
/// netframe::message_kind! {
///     pub enum CustomMsgTypes {
///         ServerAccept = 0,
///         ServerDeny = 1,
///         ServerPing = 2,
///     }
/// }
///
/// use netframe::MessageKind;
/// assert_eq!(CustomMsgTypes::ServerPing.to_wire(), 2);
/// assert_eq!(CustomMsgTypes::from_wire(1), Some(CustomMsgTypes::ServerDeny));
/// assert_eq!(CustomMsgTypes::from_wire(9), None);
/// ```
#[macro_export]
macro_rules! message_kind {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $crate::MessageKind for $name {
            fn to_wire(self) -> u32 {
                self as u32
            }

            fn from_wire(raw: u32) -> Option<Self> {
                $(
                    if raw == $value {
                        return Some(Self::$variant);
                    }
                )+
                None
            }
        }
    };
}

/// Fixed-size value that can be pushed to and popped from a message body
pub trait BodyValue: Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Append the big-endian encoding to `buf`
    fn put(&self, buf: &mut BytesMut);

    /// Decode from exactly [`SIZE`](Self::SIZE) bytes
    fn get(bytes: &[u8]) -> Self;
}

macro_rules! impl_body_value {
    ($($ty:ty => $put:ident, $get:ident;)+) => {
        $(
            impl BodyValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn put(&self, buf: &mut BytesMut) {
                    buf.$put(*self);
                }

                fn get(mut bytes: &[u8]) -> Self {
                    bytes.$get()
                }
            }
        )+
    };
}

impl_body_value! {
    u8 => put_u8, get_u8;
    i8 => put_i8, get_i8;
    u16 => put_u16, get_u16;
    i16 => put_i16, get_i16;
    u32 => put_u32, get_u32;
    i32 => put_i32, get_i32;
    u64 => put_u64, get_u64;
    i64 => put_i64, get_i64;
    u128 => put_u128, get_u128;
    i128 => put_i128, get_i128;
    f32 => put_f32, get_f32;
    f64 => put_f64, get_f64;
}

impl BodyValue for bool {
    const SIZE: usize = 1;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }

    fn get(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader<T> {
    /// Application-defined kind
    pub kind: T,
    /// Exact byte length of the body that follows
    pub size: u32,
}

impl<T: MessageKind> MessageHeader<T> {
    /// Encode into wire format
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.kind.to_wire().to_be_bytes());
        out[4..].copy_from_slice(&self.size.to_be_bytes());
        out
    }

    /// Decode from wire format
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::UnknownKind`] if the kind is not defined by `T`.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let mut buf = &bytes[..];
        let raw_kind = buf.get_u32();
        let size = buf.get_u32();
        let kind = T::from_wire(raw_kind).ok_or(NetworkError::UnknownKind(raw_kind))?;
        Ok(Self { kind, size })
    }
}

/// Network message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<T> {
    kind: T,
    body: BytesMut,
}

impl<T: MessageKind> Message<T> {
    /// Create a header-only message
    #[must_use]
    pub fn new(kind: T) -> Self {
        Self {
            kind,
            body: BytesMut::new(),
        }
    }

    /// Create a message with the given body bytes
    #[must_use]
    pub fn with_body(kind: T, body: impl AsRef<[u8]>) -> Self {
        Self {
            kind,
            body: BytesMut::from(body.as_ref()),
        }
    }

    pub(crate) fn from_parts(kind: T, body: BytesMut) -> Self {
        Self { kind, body }
    }

    /// Create a message whose body is the JSON encoding of `value`
    pub fn from_json<V: Serialize>(kind: T, value: &V) -> Result<Self> {
        let json = serde_json::to_vec(value).map_err(|e| {
            NetworkError::serialization(format!("JSON serialization failed: {}", e))
        })?;
        Ok(Self::with_body(kind, json))
    }

    /// Deserialize the body as JSON
    pub fn to_json<V: for<'de> Deserialize<'de>>(&self) -> Result<V> {
        serde_json::from_slice(&self.body)
            .map_err(|e| NetworkError::serialization(format!("JSON deserialization failed: {}", e)))
    }

    /// Message kind
    #[must_use]
    pub fn kind(&self) -> T {
        self.kind
    }

    /// Change the message kind
    pub fn set_kind(&mut self, kind: T) {
        self.kind = kind;
    }

    /// Header describing this message; `size` always equals the body length
    #[must_use]
    pub fn header(&self) -> MessageHeader<T> {
        MessageHeader {
            kind: self.kind,
            size: self.body.len() as u32,
        }
    }

    /// Body bytes
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Check if the message has no body
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Push a fixed-size value onto the end of the body
    pub fn push<V: BodyValue>(&mut self, value: V) -> &mut Self {
        self.body.reserve(V::SIZE);
        value.put(&mut self.body);
        self
    }

    /// Pop the most recently pushed value off the end of the body
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::BodyUnderflow`] if the body is shorter than `V`.
    pub fn pop<V: BodyValue>(&mut self) -> Result<V> {
        let available = self.body.len();
        if available < V::SIZE {
            return Err(NetworkError::BodyUnderflow {
                needed: V::SIZE,
                available,
            });
        }
        let tail = self.body.split_off(available - V::SIZE);
        Ok(V::get(&tail))
    }

    /// Encode message into wire format
    pub fn encode(&self) -> Result<BytesMut> {
        self.encode_with_limit(MAX_MESSAGE_SIZE)
    }

    /// Encode message into wire format, rejecting bodies above `max_size`
    pub fn encode_with_limit(&self, max_size: usize) -> Result<BytesMut> {
        let max_size = max_size.min(WIRE_BODY_LIMIT);
        let len = self.body.len();
        if len > max_size {
            return Err(NetworkError::MessageTooLarge(len, max_size));
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + len);
        buf.put_slice(&self.header().to_bytes());
        buf.put_slice(&self.body);
        Ok(buf)
    }

    /// Decode one message from the front of `buf`
    ///
    /// Returns `Ok(None)` until a complete frame is buffered.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&buf[..HEADER_SIZE]);
        let header = MessageHeader::<T>::from_bytes(&header_bytes)?;
        let len = header.size as usize;

        if len > MAX_MESSAGE_SIZE {
            return Err(NetworkError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
        }

        if buf.len() < HEADER_SIZE + len {
            return Ok(None);
        }

        buf.advance(HEADER_SIZE);
        let body = buf.split_to(len);

        Ok(Some(Self::from_parts(header.kind, body)))
    }
}

impl<T: MessageKind> fmt::Display for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message[{:?}, {} bytes]", self.kind, self.size())
    }
}

/// A message tagged with the connection that delivered it
///
/// The origin is shared ownership: a queued message keeps its connection
/// object alive even after the registry has pruned it, so the consumer still
/// sees who sent it. It is empty on the client side, where the only peer is
/// implicit.
#[derive(Debug)]
pub struct OwnedMessage<T: MessageKind> {
    origin: Option<Arc<Connection<T>>>,
    /// The delivered message
    pub msg: Message<T>,
}

impl<T: MessageKind> OwnedMessage<T> {
    pub(crate) fn new(origin: Option<Arc<Connection<T>>>, msg: Message<T>) -> Self {
        Self { origin, msg }
    }

    /// Connection that delivered this message
    ///
    /// The connection may already be closed; check
    /// [`Connection::is_connected`] before relying on it.
    #[must_use]
    pub fn remote(&self) -> Option<&Arc<Connection<T>>> {
        self.origin.as_ref()
    }

    /// Whether the message carries an origin at all
    #[must_use]
    pub fn has_origin(&self) -> bool {
        self.origin.is_some()
    }

    /// Split into origin and message
    #[must_use]
    pub fn into_parts(self) -> (Option<Arc<Connection<T>>>, Message<T>) {
        (self.origin, self.msg)
    }
}
