//! Broadcaster
//!
//! Best-effort fan-out of one message to every peer but an optional sender.
//! At-most-once, no retry, no backpressure.

use std::sync::Arc;

use crate::config::Framing;
use crate::protocol::{encode, Message};
use super::{ConnectionId, PeerSet};

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the full message was handed to
    pub delivered: usize,

    /// Peers whose write failed
    pub failed: usize,
}

impl BroadcastReport {
    /// Number of peers a write was attempted on
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Sends messages to every member of a peer set
#[derive(Clone)]
pub struct Broadcaster {
    peers: Arc<dyn PeerSet>,
    framing: Framing,
}

impl Broadcaster {
    pub fn new(peers: Arc<dyn PeerSet>, framing: Framing) -> Self {
        Self { peers, framing }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Send `message` to all peers except `exclude`
    ///
    /// Holds the peer set lock for the whole iteration. A failed write is
    /// logged and counted; it neither stops the fan-out nor removes the peer.
    pub fn broadcast(&self, message: &Message, exclude: Option<ConnectionId>) -> BroadcastReport {
        let wire = encode(self.framing, message);
        let mut report = BroadcastReport::default();

        self.peers.for_each(&mut |conn| {
            if Some(conn.id()) == exclude {
                return;
            }

            match conn.send(&wire) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!("Broadcast error to {} ({}): {}", conn.peer_addr(), conn.id(), e);
                    report.failed += 1;
                }
            }
        });

        tracing::trace!(
            "Broadcast {} bytes: {} delivered, {} failed",
            message.len(),
            report.delivered,
            report.failed
        );
        report
    }
}
