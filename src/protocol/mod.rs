//! Protocol Module
//!
//! Turns the raw byte stream of a connection into discrete chat messages.
//!
//! ## Framing Modes
//!
//! ### Line (default)
//! ```text
//! ┌─────────────────────────────┬──────┐
//! │       UTF-8 text            │ \n   │
//! └─────────────────────────────┴──────┘
//! ```
//!
//! ### Length-prefixed
//! ```text
//! ┌──────────┬─────────────────────────────┐
//! │ Len (4)  │         Payload             │
//! └──────────┴─────────────────────────────┘
//! ```
//!
//! ### Raw
//! No delimiter at all: whatever a single read returns is one message.
//! TCP does not preserve write boundaries, so this mode can split or merge
//! messages under load. It exists only to talk to peers that never frame.

mod message;
mod codec;

pub use message::Message;
pub use codec::{encode, FrameDecoder, LENGTH_PREFIX_SIZE};
