//! Reader Loop
//!
//! One blocking reader thread per connection.
//!
//! ## States
//! ```text
//! Open ──(on_connect)──▶ Reading ──(n > 0)──▶ Delivering ──▶ Reading
//!                           │
//!                           └──(EOF / error)──▶ Closed
//! ```
//!
//! On `Closed` the connection is removed from its peer set and its stream
//! shut down. Only the thread that actually removed it reports the
//! disconnect, so a connection is announced gone exactly once even when a
//! local shutdown races with the peer hanging up.

use std::io::ErrorKind;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::protocol::{FrameDecoder, Message};
use super::{Connection, PeerSet};

/// Role-specific reaction to connection events
pub trait PeerHandler: Send + Sync {
    /// The reader thread for a registered connection is running
    ///
    /// Comes before any other event for that connection, and only for
    /// connections that will later get `on_disconnect` or a local close.
    fn on_connect(&self, _conn: &Arc<Connection>) {}

    /// A complete, non-empty message arrived
    fn on_message(&self, from: &Arc<Connection>, message: Message);

    /// The connection was removed; `error` is set when it ended on a fault
    fn on_disconnect(&self, conn: &Arc<Connection>, error: Option<&ChatError>);
}

/// Per-connection read loop
pub struct ReaderLoop {
    conn: Arc<Connection>,
    peers: Arc<dyn PeerSet>,
    handler: Arc<dyn PeerHandler>,
    decoder: FrameDecoder,
    read_buffer_size: usize,
}

impl ReaderLoop {
    pub fn new(
        conn: Arc<Connection>,
        peers: Arc<dyn PeerSet>,
        handler: Arc<dyn PeerHandler>,
        config: &Config,
    ) -> Self {
        Self {
            conn,
            peers,
            handler,
            decoder: FrameDecoder::new(config.framing, config.max_message_size),
            read_buffer_size: config.read_buffer_size.max(1),
        }
    }

    /// Run the loop on a dedicated thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let name = format!("reader-{}", self.conn.id().as_u64());
        let handle = thread::Builder::new().name(name).spawn(move || self.run())?;
        Ok(handle)
    }

    /// Read until EOF or error, then tear the connection down
    pub fn run(mut self) {
        tracing::debug!("Reader started for {} ({})", self.conn.peer_addr(), self.conn.id());
        self.handler.on_connect(&self.conn);

        let outcome = self.read_until_closed();
        let error = outcome.err();

        match &error {
            None => tracing::debug!("Peer {} closed the connection", self.conn.peer_addr()),
            Some(e) if e.is_disconnect() => {
                tracing::debug!("Peer {} went away: {}", self.conn.peer_addr(), e)
            }
            Some(e) if self.conn.is_closed() => {
                // Closed locally (shutdown); the read error is expected
                tracing::debug!("Reader for {} stopped: {}", self.conn.peer_addr(), e)
            }
            Some(e) => tracing::warn!("Error reading from {}: {}", self.conn.peer_addr(), e),
        }

        let removed = self.peers.remove(self.conn.id()).is_some();
        self.conn.close();

        if removed {
            self.handler.on_disconnect(&self.conn, error.as_ref());
        }
    }

    fn read_until_closed(&mut self) -> Result<()> {
        let mut buf = vec![0u8; self.read_buffer_size];

        loop {
            // Reading
            let n = match self.conn.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            // Delivering
            self.decoder.feed(&buf[..n]);
            while let Some(message) = self.decoder.next_message()? {
                self.deliver(message);
            }
        }

        if let Some(message) = self.decoder.finish()? {
            self.deliver(message);
        }
        Ok(())
    }

    fn deliver(&self, message: Message) {
        if message.is_empty() {
            return;
        }
        tracing::trace!("Received {} bytes from {}", message.len(), self.conn.peer_addr());
        self.handler.on_message(&self.conn, message);
    }
}
