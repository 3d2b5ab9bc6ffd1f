//! Shutdown signal
//!
//! Cancellation token shared by the accept loop, reader loops and the
//! dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable one-way shutdown flag
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown; returns `true` for the first caller
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
