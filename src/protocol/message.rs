//! Message definition
//!
//! An opaque chat message, interpreted as UTF-8 text when displayed.

use std::borrow::Cow;

use bytes::Bytes;

/// A single chat message (payload only, framing stripped)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
}

impl Message {
    /// Create a message from raw bytes
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Create a message from text
    pub fn from_text(text: &str) -> Self {
        Self::new(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Decode the payload as text
    ///
    /// Malformed sequences become U+FFFD instead of failing.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Raw payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Shared payload buffer
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::from_text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::new(Bytes::from(text.into_bytes()))
    }
}
