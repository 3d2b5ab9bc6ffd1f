//! Connection
//!
//! One live TCP peer: a read side owned by its reader loop and a write
//! side shared by whichever thread is broadcasting or dispatching.

use std::fmt;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{ChatError, Result};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side of the chat this peer is, seen from the local process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// The host we joined (client role)
    Upstream,

    /// A client that joined us (server role)
    Downstream,
}

/// A single live peer connection
pub struct Connection {
    id: ConnectionId,
    role: PeerRole,

    /// Peer address for logging
    peer_addr: String,

    /// Read half; only the reader loop reads from it
    stream: TcpStream,

    /// Write half; writers from different threads are serialized here
    writer: Mutex<TcpStream>,

    closed: AtomicBool,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Connection {
    /// Wrap an established stream
    ///
    /// Applies TCP_NODELAY and the write timeout from `config`.
    pub fn new(stream: TcpStream, role: PeerRole, config: &Config) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        stream.set_nodelay(config.nodelay)?;
        stream.set_write_timeout(config.write_timeout())?;

        let write_stream = stream.try_clone()?;

        Ok(Self {
            id: ConnectionId::next(),
            role,
            peer_addr,
            stream,
            writer: Mutex::new(write_stream),
            closed: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// Whether this is the host we joined
    pub fn is_upstream(&self) -> bool {
        self.role == PeerRole::Upstream
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Read up to `buf.len()` bytes (blocking)
    ///
    /// Returns 0 on EOF, like `Read::read`.
    pub fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = (&self.stream).read(buf)?;
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    /// Write the full byte sequence to the peer
    ///
    /// Hands bytes to the OS send buffer; delivery is not confirmed.
    ///
    /// A failed write may have left part of a frame on the wire, so the
    /// socket is shut down before the error is returned. Registry removal
    /// is left to the reader loop, which sees the shutdown on its next read.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(ChatError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("connection {} is closed", self.id),
            )));
        }

        let mut writer = self.writer.lock();
        let written = writer.write_all(bytes).and_then(|()| writer.flush());
        drop(writer);

        if let Err(e) = written {
            tracing::warn!("Write to {} ({}) failed, closing: {}", self.peer_addr, self.id, e);
            self.close();
            return Err(e.into());
        }

        self.bytes_sent.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        tracing::trace!("Sent {} bytes to {} ({})", bytes.len(), self.peer_addr, self.id);
        Ok(())
    }

    /// Shut the socket down in both directions
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            // Peer may already have torn the socket down
            tracing::debug!("Shutdown of {} ({}) failed: {}", self.peer_addr, self.id, e);
        }
        tracing::debug!("Closed connection {} ({})", self.id, self.peer_addr);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
