//! TCP Server
//!
//! Binds the chat port, accepts clients and hands each one to its own
//! reader thread.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::error::{ChatError, Result};
use super::{Connection, PeerHandler, PeerRole, PeerSet, ReaderLoop, ShutdownSignal};

/// Whether a server's accept loop is still running
///
/// Set when the listener is bound, cleared once `Server::run` returns for
/// any reason: shutdown, or giving up after repeated accept failures.
#[derive(Debug, Clone)]
pub struct ListenerStatus {
    accepting: Arc<AtomicBool>,
}

impl ListenerStatus {
    fn new() -> Self {
        Self {
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    fn stopped(&self) {
        self.accepting.store(false, Ordering::Release);
    }
}

/// Listener/acceptor for the hosting role
pub struct Server {
    config: Config,
    listener: TcpListener,
    local_addr: SocketAddr,
    peers: Arc<dyn PeerSet>,
    handler: Arc<dyn PeerHandler>,
    shutdown: ShutdownSignal,
    status: ListenerStatus,
    readers: Vec<JoinHandle<()>>,
}

impl Server {
    /// Bind the listen address from `config`
    ///
    /// Fails with `ChatError::Bind` when the port is unavailable.
    pub fn bind(
        config: Config,
        peers: Arc<dyn PeerSet>,
        handler: Arc<dyn PeerHandler>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        let bind_err = |source| ChatError::Bind {
            addr: config.listen_addr.clone(),
            source,
        };

        let listener = TcpListener::bind(&config.listen_addr).map_err(bind_err)?;
        // Non-blocking so the loop can observe shutdown between accepts
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        tracing::info!("Listening on {}", local_addr);

        Ok(Self {
            config,
            listener,
            local_addr,
            peers,
            handler,
            shutdown,
            status: ListenerStatus::new(),
            readers: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle that outlives `run` and reports when the accept loop exits
    pub fn status(&self) -> ListenerStatus {
        self.status.clone()
    }

    /// Accept until shutdown (blocking)
    ///
    /// Accept errors are retried with exponential backoff. After
    /// `accept_max_failures` consecutive failures the last error is returned.
    pub fn run(mut self) -> Result<()> {
        let poll_interval = Duration::from_millis(self.config.accept_poll_interval_ms.max(1));
        let initial_backoff = Duration::from_millis(self.config.accept_backoff_initial_ms);
        let max_backoff = Duration::from_millis(self.config.accept_backoff_max_ms);

        let mut backoff = initial_backoff;
        let mut failures = 0u32;

        let outcome = loop {
            if self.shutdown.is_triggered() {
                break Ok(());
            }

            match self.listener.accept() {
                Ok((stream, addr)) => {
                    failures = 0;
                    backoff = initial_backoff;
                    if let Err(e) = self.register(stream) {
                        tracing::warn!("Failed to register client {}: {}", addr, e);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(poll_interval),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    failures += 1;
                    tracing::error!(
                        "Accept failed ({}/{}): {}",
                        failures,
                        self.config.accept_max_failures,
                        e
                    );
                    if failures >= self.config.accept_max_failures {
                        break Err(ChatError::Io(e));
                    }
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        };
        self.status.stopped();

        if self.shutdown.is_triggered() {
            self.stop_readers();
        }
        outcome
    }

    fn register(&mut self, stream: TcpStream) -> Result<()> {
        // Accepted sockets inherit O_NONBLOCK on some platforms
        stream.set_nonblocking(false)?;

        let conn = Arc::new(Connection::new(stream, PeerRole::Downstream, &self.config)?);
        if !self.peers.add(Arc::clone(&conn)) {
            conn.close();
            return Ok(());
        }

        tracing::debug!("Client connected from {} ({})", conn.peer_addr(), conn.id());

        // The reader announces the connection once its thread is running
        let reader = ReaderLoop::new(
            Arc::clone(&conn),
            Arc::clone(&self.peers),
            Arc::clone(&self.handler),
            &self.config,
        );
        match reader.spawn() {
            Ok(handle) => self.readers.push(handle),
            Err(e) => {
                self.peers.remove(conn.id());
                conn.close();
                return Err(e);
            }
        }

        self.readers.retain(|h| !h.is_finished());
        Ok(())
    }

    /// Close every connection and wait for the reader threads
    ///
    /// Runs after the accept loop has exited, so no new connection can be
    /// registered behind its back. Existing clients outlive an accept failure.
    fn stop_readers(&mut self) {
        let closed = self.peers.close_all();
        if closed > 0 {
            tracing::debug!("Closed {} client connections", closed);
        }
        for handle in self.readers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("Reader thread panicked");
            }
        }
    }
}
