//! Network Module
//!
//! TCP connection management and message fan-out.
//!
//! ## Architecture
//! - Single acceptor thread (host only)
//! - One blocking reader thread per connection, for both roles
//! - Shared peer set guarded by one mutex; broadcasts hold it for the
//!   whole iteration so membership cannot change mid fan-out
//!
//! ```text
//!   Listener ──accept──▶ Connection ──add──▶ PeerSet ◀──for_each── Broadcaster
//!                            │                  ▲                       ▲
//!                            ▼                  │ remove                │
//!                       ReaderLoop ─────────────┘                       │
//!                            └──────── on_message (relay) ──────────────┘
//! ```

mod connection;
mod registry;
mod broadcast;
mod reader;
mod server;
mod client;
mod shutdown;

pub use connection::{Connection, ConnectionId, PeerRole};
pub use registry::{ConnectionRegistry, PeerSet, UpstreamSlot};
pub use broadcast::{BroadcastReport, Broadcaster};
pub use reader::{PeerHandler, ReaderLoop};
pub use server::{ListenerStatus, Server};
pub use client::{resolve_target, Client};
pub use shutdown::ShutdownSignal;
