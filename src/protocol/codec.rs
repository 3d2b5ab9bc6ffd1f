//! Protocol codec
//!
//! Encoding of outbound messages and incremental decoding of inbound bytes.
//!
//! The decoder is fed whatever each socket read returns and yields complete
//! messages as they become available, so a message split across reads (or
//! several messages packed into one read) is reassembled correctly for the
//! line and length-prefixed modes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::Framing;
use crate::error::{ChatError, Result};
use super::Message;

/// Length prefix size: 4 bytes big-endian
pub const LENGTH_PREFIX_SIZE: usize = 4;

// =============================================================================
// Encoding
// =============================================================================

/// Encode a message for the wire
pub fn encode(framing: Framing, message: &Message) -> Bytes {
    let payload = message.as_bytes();

    match framing {
        Framing::Raw => message.payload().clone(),
        Framing::Line => {
            let mut buf = BytesMut::with_capacity(payload.len() + 1);
            buf.put_slice(payload);
            buf.put_u8(b'\n');
            buf.freeze()
        }
        Framing::LengthPrefixed => {
            let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
            buf.put_u32(payload.len() as u32);
            buf.put_slice(payload);
            buf.freeze()
        }
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Incremental decoder for one connection's inbound stream
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    max_message_size: usize,
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder for the given framing mode
    pub fn new(framing: Framing, max_message_size: usize) -> Self {
        Self {
            framing,
            max_message_size,
            buffer: BytesMut::new(),
        }
    }

    /// Append bytes read from the stream
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete message, if any
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        match self.framing {
            Framing::Raw => Ok(self.take_all()),
            Framing::Line => self.next_line(),
            Framing::LengthPrefixed => self.next_length_prefixed(),
        }
    }

    /// Flush whatever is left once the peer has closed its side
    pub fn finish(&mut self) -> Result<Option<Message>> {
        match self.framing {
            Framing::Raw => Ok(self.take_all()),
            Framing::Line => {
                let mut rest = self.buffer.split();
                strip_carriage_return(&mut rest);
                if rest.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Message::new(rest.freeze())))
                }
            }
            Framing::LengthPrefixed => {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let dangling = self.buffer.len();
                self.buffer.clear();
                Err(ChatError::Protocol(format!(
                    "stream closed inside a frame ({} bytes pending)",
                    dangling
                )))
            }
        }
    }

    fn take_all(&mut self) -> Option<Message> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(Message::new(self.buffer.split().freeze()))
        }
    }

    fn next_line(&mut self) -> Result<Option<Message>> {
        let newline = self.buffer.iter().position(|&b| b == b'\n');

        match newline {
            Some(pos) => {
                if pos > self.max_message_size {
                    return Err(ChatError::Protocol(format!(
                        "Line too long: {} bytes (max {})",
                        pos, self.max_message_size
                    )));
                }
                let mut line = self.buffer.split_to(pos + 1);
                line.truncate(pos);
                strip_carriage_return(&mut line);
                Ok(Some(Message::new(line.freeze())))
            }
            None if self.buffer.len() > self.max_message_size => {
                Err(ChatError::Protocol(format!(
                    "Line too long: {} bytes without terminator (max {})",
                    self.buffer.len(),
                    self.max_message_size
                )))
            }
            None => Ok(None),
        }
    }

    fn next_length_prefixed(&mut self) -> Result<Option<Message>> {
        if self.buffer.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;

        if len > self.max_message_size {
            return Err(ChatError::Protocol(format!(
                "Payload too large: {} bytes (max {})",
                len, self.max_message_size
            )));
        }

        if self.buffer.len() < LENGTH_PREFIX_SIZE + len {
            // Reserve up front so a large frame doesn't reallocate per read
            self.buffer.reserve(LENGTH_PREFIX_SIZE + len - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX_SIZE);
        let payload = self.buffer.split_to(len).freeze();
        Ok(Some(Message::new(payload)))
    }
}

fn strip_carriage_return(line: &mut BytesMut) {
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
}
