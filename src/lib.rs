//! # LanChat
//!
//! A minimal peer-to-peer LAN text chat:
//! - One process hosts and relays messages between any number of clients
//! - Every other process joins that host over plain TCP
//! - Line, length-prefixed or raw (unframed) message boundaries
//! - One blocking reader thread per connection, shared locked peer set
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Terminal (stdin/stdout)                  │
//! └───────────────┬───────────────────────────────▲─────────────┘
//!                 │ lines                         │ display / notify
//! ┌───────────────▼───────────────┐   ┌───────────┴─────────────┐
//! │     Outbound Dispatcher       │   │   Reader Loop (1/conn)  │
//! │          (ChatNode)           │   │  relay (host) / display │
//! └───────────────┬───────────────┘   └───────────┬─────────────┘
//!                 │                               │
//!          ┌──────▼───────────────────────────────▼──────┐
//!          │                 Broadcaster                 │
//!          └──────────────────────┬──────────────────────┘
//!                                 │ for_each (locked)
//!          ┌──────────────────────▼──────────────────────┐
//!          │  PeerSet: ConnectionRegistry | UpstreamSlot │
//!          └─────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod network;
pub mod terminal;
pub mod node;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ChatError, Result};
pub use config::{Config, Framing, DEFAULT_PORT};
pub use node::{ChatNode, Role};
pub use protocol::Message;
pub use terminal::{ChannelTerminal, ConsoleTerminal, Terminal, TerminalEvent};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of LanChat
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
