//! Message framing and little-endian buffer helpers
//!
//! The transport carries each buffer as a length-prefixed frame; inside a
//! frame the game protocol is a packed sequence of fixed-layout messages.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::game::constants::net::MAX_MESSAGE_SIZE;

/// Errors that can occur during message framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Read a length-prefixed message from a stream
///
/// Format: [4 bytes little-endian length][payload]
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, FramingError> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FramingError::ConnectionClosed);
        }
        Err(e) => return Err(FramingError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
    }

    if len == 0 {
        return Ok(Vec::new());
    }

    let mut buf = vec![0u8; len];
    match stream.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(FramingError::ConnectionClosed)
        }
        Err(e) => Err(FramingError::Io(e)),
    }
}

/// Write a length-prefixed message to a stream
///
/// Format: [4 bytes little-endian length][payload]
pub async fn write_message<W: AsyncWrite + Unpin>(
    stream: &mut W,
    data: &[u8],
) -> Result<(), FramingError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge(data.len(), MAX_MESSAGE_SIZE));
    }

    let len_bytes = (data.len() as u32).to_le_bytes();
    stream.write_all(&len_bytes).await?;
    stream.write_all(data).await?;
    stream.flush().await?;

    Ok(())
}

/// Frame builder for constructing messages
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Write raw bytes to the frame
    pub fn write(mut self, data: &[u8]) -> Self {
        self.buffer.extend_from_slice(data);
        self
    }

    /// Write a u8
    pub fn write_u8(mut self, value: u8) -> Self {
        self.buffer.push(value);
        self
    }

    /// Write an i8
    pub fn write_i8(mut self, value: i8) -> Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a u16 (little-endian)
    pub fn write_u16(mut self, value: u16) -> Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a f32 (little-endian)
    pub fn write_f32(mut self, value: f32) -> Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Get the built frame
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current length
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame reader for parsing messages
pub struct FrameReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Read n bytes
    pub fn read(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.position + n > self.data.len() {
            return None;
        }
        let slice = &self.data[self.position..self.position + n];
        self.position += n;
        Some(slice)
    }

    /// Read a u8
    pub fn read_u8(&mut self) -> Option<u8> {
        self.read(1).map(|b| b[0])
    }

    /// Read an i8
    pub fn read_i8(&mut self) -> Option<i8> {
        self.read(1).map(|b| i8::from_le_bytes([b[0]]))
    }

    /// Read a u16 (little-endian)
    pub fn read_u16(&mut self) -> Option<u16> {
        self.read(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a f32 (little-endian)
    pub fn read_f32(&mut self) -> Option<f32> {
        self.read(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Get remaining byte count
    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.position
    }

    /// Check if there are more bytes to read
    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    /// Get current position
    pub fn position(&self) -> usize {
        self.position
    }
}
