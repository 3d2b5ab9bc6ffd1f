//! Error types for LanChat
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using ChatError
pub type Result<T> = std::result::Result<T, ChatError>;

/// Unified error type for LanChat operations
#[derive(Debug, Error)]
pub enum ChatError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Connection Setup Errors
    // -------------------------------------------------------------------------
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Not connected to any server.")]
    NotConnected,

    // -------------------------------------------------------------------------
    // Framing Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("node is shutting down")]
    Shutdown,
}

impl ChatError {
    /// Whether this error is the peer going away rather than a real fault
    pub fn is_disconnect(&self) -> bool {
        match self {
            ChatError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}
