//! Chat Node
//!
//! Ties the pieces together for one process.
//!
//! ## Responsibilities
//! - Fix the role (host or join) once at startup
//! - Set up the listener or the upstream connection
//! - React to inbound messages per role (relay vs. display)
//! - Dispatch outbound lines from the terminal
//! - Tear everything down on shutdown
//!
//! Setup failures (port in use, host unreachable) are reported to the
//! terminal and leave the node running in a degraded state: a host with no
//! listener, or a client with no upstream.

use std::fmt;
use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::config::{Config, Framing};
use crate::error::{ChatError, Result};
use crate::network::{
    Broadcaster, Client, Connection, ConnectionRegistry, ListenerStatus, PeerHandler, PeerSet,
    Server, ShutdownSignal, UpstreamSlot,
};
use crate::protocol::Message;
use crate::terminal::{notice, Terminal};

/// Input line that ends the dispatcher loop
pub const QUIT_COMMAND: &str = "/quit";

/// Process-wide role, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Hosts the chat and relays between clients
    Server,

    /// Talks to exactly one host
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

// =============================================================================
// Inbound handlers
// =============================================================================

/// Host side: show the message locally and relay it to everyone else
struct RelayHandler {
    broadcaster: Broadcaster,
    terminal: Arc<dyn Terminal>,
}

impl PeerHandler for RelayHandler {
    fn on_connect(&self, _conn: &Arc<Connection>) {
        self.terminal.notify(notice::CLIENT_CONNECTED);
    }

    fn on_message(&self, from: &Arc<Connection>, message: Message) {
        self.terminal.display(&message.text());
        self.broadcaster.broadcast(&message, Some(from.id()));
    }

    fn on_disconnect(&self, _conn: &Arc<Connection>, error: Option<&ChatError>) {
        if let Some(e) = error.filter(|e| !e.is_disconnect()) {
            self.terminal.notify(&format!("Client error: {}", e));
        }
        self.terminal.notify(notice::CLIENT_DISCONNECTED);
    }
}

/// Client side: show the message
struct DisplayHandler {
    terminal: Arc<dyn Terminal>,
}

impl PeerHandler for DisplayHandler {
    fn on_connect(&self, _conn: &Arc<Connection>) {
        self.terminal.notify(notice::CONNECTED_TO_SERVER);
    }

    fn on_message(&self, _from: &Arc<Connection>, message: Message) {
        self.terminal.display(&message.text());
    }

    fn on_disconnect(&self, _conn: &Arc<Connection>, error: Option<&ChatError>) {
        if let Some(e) = error.filter(|e| !e.is_disconnect()) {
            self.terminal.notify(&format!("Listening error: {}", e));
        }
        self.terminal.notify(notice::SERVER_DISCONNECTED);
    }
}

// =============================================================================
// Node
// =============================================================================

/// A running chat participant
pub struct ChatNode {
    role: Role,
    config: Config,

    /// Host: every client. Client: the single upstream.
    peers: Arc<dyn PeerSet>,

    broadcaster: Broadcaster,
    terminal: Arc<dyn Terminal>,
    shutdown: ShutdownSignal,

    /// Bound address when hosting successfully
    local_addr: Option<SocketAddr>,
    listener: Option<ListenerStatus>,

    acceptor: Mutex<Option<JoinHandle<()>>>,
    upstream_reader: Mutex<Option<JoinHandle<()>>>,
}

impl ChatNode {
    /// Host a chat on `config.listen_addr`
    ///
    /// Only an invalid config is an error. A bind failure is reported as
    /// `Server error: ...` and the node keeps running without a listener.
    pub fn host(config: Config, terminal: Arc<dyn Terminal>) -> Result<Self> {
        config.validate()?;

        let registry: Arc<dyn PeerSet> = Arc::new(ConnectionRegistry::new());
        let mut node = Self::new(Role::Server, config, registry, terminal);

        let handler: Arc<dyn PeerHandler> = Arc::new(RelayHandler {
            broadcaster: node.broadcaster.clone(),
            terminal: Arc::clone(&node.terminal),
        });

        let server = Server::bind(
            node.config.clone(),
            Arc::clone(&node.peers),
            handler,
            node.shutdown.clone(),
        );
        let server = match server {
            Ok(server) => server,
            Err(e) => {
                tracing::error!("Hosting failed: {}", e);
                node.terminal.notify(&format!("Server error: {}", e));
                return Ok(node);
            }
        };

        node.local_addr = Some(server.local_addr());
        node.listener = Some(server.status());
        let terminal = Arc::clone(&node.terminal);
        let acceptor = std::thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || {
                if let Err(e) = server.run() {
                    tracing::error!("Accept loop stopped: {}", e);
                    terminal.notify(&format!("Server error: {}", e));
                }
            });

        match acceptor {
            Ok(handle) => {
                *node.acceptor.lock() = Some(handle);
                node.terminal.notify(notice::SERVER_STARTED);
            }
            Err(e) => {
                tracing::error!("Failed to start accept loop: {}", e);
                node.local_addr = None;
                node.listener = None;
                node.terminal.notify(&format!("Server error: {}", e));
            }
        }

        Ok(node)
    }

    /// Join the host at `target` (`ip`, `ip:port` or `host:port`)
    ///
    /// Only an invalid config is an error. A connect failure is reported as
    /// `Connection error: ...` and the node keeps running unconnected.
    pub fn join(config: Config, target: &str, terminal: Arc<dyn Terminal>) -> Result<Self> {
        config.validate()?;

        let upstream = Arc::new(UpstreamSlot::new());
        let peers: Arc<dyn PeerSet> = upstream.clone();
        let node = Self::new(Role::Client, config, peers, terminal);

        let handler: Arc<dyn PeerHandler> = Arc::new(DisplayHandler {
            terminal: Arc::clone(&node.terminal),
        });

        match Client::connect(target, &node.config, upstream, handler) {
            Ok(client) => *node.upstream_reader.lock() = Some(client.into_reader()),
            Err(e) => {
                tracing::warn!("Joining {} failed: {}", target, e);
                node.terminal.notify(&format!("Connection error: {}", e));
            }
        }

        Ok(node)
    }

    /// A client that never joined anything
    ///
    /// Every send reports `Not connected to any server.`
    pub fn detached(config: Config, terminal: Arc<dyn Terminal>) -> Result<Self> {
        config.validate()?;
        let peers: Arc<dyn PeerSet> = Arc::new(UpstreamSlot::new());
        Ok(Self::new(Role::Client, config, peers, terminal))
    }

    fn new(role: Role, config: Config, peers: Arc<dyn PeerSet>, terminal: Arc<dyn Terminal>) -> Self {
        let broadcaster = Broadcaster::new(Arc::clone(&peers), config.framing);
        Self {
            role,
            config,
            peers,
            broadcaster,
            terminal,
            shutdown: ShutdownSignal::new(),
            local_addr: None,
            listener: None,
            acceptor: Mutex::new(None),
            upstream_reader: Mutex::new(None),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bound listener address; `None` for clients and for a failed host
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether the accept loop is still taking new clients
    ///
    /// False for clients, after a failed bind, after shutdown, and once the
    /// accept loop has given up on repeated failures.
    pub fn is_listening(&self) -> bool {
        let accepting = self.listener.as_ref().map_or(false, |l| l.is_accepting());
        accepting && !self.shutdown.is_triggered()
    }

    /// Host: connected clients. Client: 1 when joined, else 0.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    // =========================================================================
    // Outbound Dispatcher
    // =========================================================================

    /// Send one line typed by the user, prefixed with the username
    ///
    /// Empty lines are ignored and return `Ok(0)`.
    pub fn send_line(&self, line: &str) -> Result<usize> {
        if line.trim().is_empty() {
            return Ok(0);
        }
        let text = format!("{}: {}", self.config.username, line);
        self.dispatch(&Message::from(text))
    }

    /// Send a message to every peer this node can reach
    ///
    /// Host: all clients, returns how many got it. Client: the upstream,
    /// returns 1, or `NotConnected` without touching the network.
    ///
    /// A message the receivers could not decode as one frame is refused
    /// with `ChatError::Protocol` before anything is written: an embedded
    /// newline under line framing, or a payload over `max_message_size`
    /// under line or length-prefixed framing.
    pub fn dispatch(&self, message: &Message) -> Result<usize> {
        if self.shutdown.is_triggered() {
            return Err(ChatError::Shutdown);
        }

        if let Err(e) = self.check_outbound(message) {
            tracing::warn!("Refusing to send: {}", e);
            self.terminal.notify(&format!("Send error: {}", e));
            return Err(e);
        }

        match self.role {
            Role::Server => Ok(self.broadcaster.broadcast(message, None).delivered),
            Role::Client => {
                if self.peers.is_empty() {
                    self.terminal.notify(notice::NOT_CONNECTED);
                    return Err(ChatError::NotConnected);
                }

                let mut outcome = Err(ChatError::NotConnected);
                let wire = crate::protocol::encode(self.broadcaster.framing(), message);
                self.peers.for_each(&mut |upstream| {
                    outcome = upstream.send(&wire).map(|()| 1);
                });

                if let Err(e) = &outcome {
                    match e {
                        ChatError::NotConnected => self.terminal.notify(notice::NOT_CONNECTED),
                        e => {
                            tracing::warn!("Send to upstream failed: {}", e);
                            self.terminal.notify(&format!("Send error: {}", e));
                        }
                    }
                }
                outcome
            }
        }
    }

    fn check_outbound(&self, message: &Message) -> Result<()> {
        let max = self.config.max_message_size;
        match self.config.framing {
            Framing::Raw => Ok(()),
            Framing::Line if message.as_bytes().contains(&b'\n') => Err(ChatError::Protocol(
                "Message contains a line break".to_string(),
            )),
            Framing::Line | Framing::LengthPrefixed if message.len() > max => Err(
                ChatError::Protocol(format!("Message too large: {} bytes (max {})", message.len(), max)),
            ),
            Framing::Line | Framing::LengthPrefixed => Ok(()),
        }
    }

    /// Read lines from `input` and dispatch each until EOF or `/quit`
    ///
    /// Per-line failures are already reported to the terminal and do not
    /// stop the loop. Does not shut the node down.
    pub fn run_dispatcher<R: BufRead>(&self, mut input: R) -> Result<()> {
        let mut line = String::new();

        loop {
            if self.shutdown.is_triggered() {
                return Ok(());
            }

            self.terminal.prompt(&self.config.username);
            line.clear();
            if input.read_line(&mut line)? == 0 {
                tracing::debug!("Input closed");
                return Ok(());
            }

            let text = line.trim_end_matches(['\r', '\n']);
            if text.trim() == QUIT_COMMAND {
                return Ok(());
            }

            match self.send_line(text) {
                Ok(n) => tracing::trace!("Dispatched line to {} peers", n),
                Err(e) => tracing::debug!("Dispatch failed: {}", e),
            }
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop accepting, close every connection and join the worker threads
    ///
    /// Idempotent. No disconnect notices are shown for connections closed
    /// here.
    pub fn shutdown(&self) {
        if !self.shutdown.trigger() {
            return;
        }
        tracing::info!("Shutting down {} node", self.role);

        let closed = self.peers.close_all();
        tracing::debug!("Closed {} connections", closed);

        let acceptor = self.acceptor.lock().take();
        if let Some(handle) = acceptor {
            if handle.join().is_err() {
                tracing::warn!("Accept thread panicked");
            }
        }

        let reader = self.upstream_reader.lock().take();
        if let Some(handle) = reader {
            if handle.join().is_err() {
                tracing::warn!("Upstream reader thread panicked");
            }
        }
    }
}

impl Drop for ChatNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}
