//! Terminal I/O
//!
//! The user-facing side of a chat node: chat text in, chat text and status
//! notices out. Diagnostics go through `tracing`, never through here.

use std::io::{self, Write};

use crossbeam::channel::{self, Receiver, Sender};

/// Status lines shown to the user
pub mod notice {
    pub const SERVER_STARTED: &str = "Server started. Waiting for clients...";
    pub const CLIENT_CONNECTED: &str = "Client connected.";
    pub const CLIENT_DISCONNECTED: &str = "Client disconnected.";
    pub const CONNECTED_TO_SERVER: &str = "Connected to the server.";
    pub const SERVER_DISCONNECTED: &str = "Server disconnected.";
    pub const NOT_CONNECTED: &str = "Not connected to any server.";
}

/// Output side of the terminal collaborator
pub trait Terminal: Send + Sync {
    /// Show an inbound chat message
    fn display(&self, text: &str);

    /// Show a status or error line
    fn notify(&self, status: &str);

    /// Called before each outbound line is read
    fn prompt(&self, _username: &str) {}
}

/// Terminal on the process's stdout
#[derive(Debug, Default)]
pub struct ConsoleTerminal;

impl ConsoleTerminal {
    pub fn new() -> Self {
        Self
    }
}

impl Terminal for ConsoleTerminal {
    fn display(&self, text: &str) {
        println!("{}", text);
    }

    fn notify(&self, status: &str) {
        println!("{}", status);
    }

    fn prompt(&self, username: &str) {
        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "{}:", username);
        let _ = stdout.flush();
    }
}

/// Something written to a `ChannelTerminal`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    Message(String),
    Notice(String),
}

/// Terminal that forwards everything over a channel
///
/// For embedding a node in another UI, and for tests.
#[derive(Debug, Clone)]
pub struct ChannelTerminal {
    tx: Sender<TerminalEvent>,
}

impl ChannelTerminal {
    pub fn new() -> (Self, Receiver<TerminalEvent>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }
}

impl Terminal for ChannelTerminal {
    fn display(&self, text: &str) {
        // Receiver gone means nobody is watching anymore
        let _ = self.tx.send(TerminalEvent::Message(text.to_string()));
    }

    fn notify(&self, status: &str) {
        let _ = self.tx.send(TerminalEvent::Notice(status.to_string()));
    }
}
