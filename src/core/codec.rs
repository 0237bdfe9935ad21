//! Streaming header/body framing over async byte streams
//!
//! These are the two halves of a connection's pipelines: `read_message`
//! reads exactly one header and, when `size > 0`, exactly `size` body bytes;
//! `write_message` writes the header and then the body. Neither ever yields a
//! partial message.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::message::{Message, MessageHeader, MessageKind, HEADER_SIZE, WIRE_BODY_LIMIT};
use crate::error::{NetworkError, Result};

/// Read one complete message from `reader`
///
/// # Errors
///
/// Fails on EOF or I/O errors, on an unknown kind, and when the announced
/// body is larger than `max_size`. The body is never allocated in that case.
pub async fn read_message<T, R>(reader: &mut R, max_size: usize) -> Result<Message<T>>
where
    T: MessageKind,
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header_bytes)
        .await
        .map_err(|e| NetworkError::connection(format!("Failed to read header: {}", e)))?;

    let header = MessageHeader::<T>::from_bytes(&header_bytes)?;
    let len = header.size as usize;
    if len > max_size {
        return Err(NetworkError::MessageTooLarge(len, max_size));
    }

    let mut body = BytesMut::zeroed(len);
    if len > 0 {
        reader
            .read_exact(&mut body)
            .await
            .map_err(|e| NetworkError::connection(format!("Failed to read body: {}", e)))?;
    }

    tracing::trace!("Read {:?} with {} byte body", header.kind, len);
    Ok(Message::from_parts(header.kind, body))
}

/// Write one complete message to `writer`
///
/// # Errors
///
/// Fails on I/O errors and when the body is larger than `max_size`.
pub async fn write_message<T, W>(writer: &mut W, message: &Message<T>, max_size: usize) -> Result<()>
where
    T: MessageKind,
    W: AsyncWrite + Unpin,
{
    let max_size = max_size.min(WIRE_BODY_LIMIT);
    if message.size() > max_size {
        return Err(NetworkError::MessageTooLarge(message.size(), max_size));
    }

    writer
        .write_all(&message.header().to_bytes())
        .await
        .map_err(|e| NetworkError::connection(format!("Failed to write header: {}", e)))?;

    if !message.is_empty() {
        writer
            .write_all(message.body())
            .await
            .map_err(|e| NetworkError::connection(format!("Failed to write body: {}", e)))?;
    }

    tracing::trace!("Wrote {:?} with {} byte body", message.kind(), message.size());
    Ok(())
}
