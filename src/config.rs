//! Configuration for LanChat
//!
//! Centralized configuration with sensible defaults.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ChatError;

/// Well-known chat port
pub const DEFAULT_PORT: u16 = 5000;

/// Main configuration for a chat node
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------
    /// Name prepended to every outbound line ("{username}: {text}")
    pub username: String,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address used when hosting
    pub listen_addr: String,

    /// Port used when joining by bare IP address
    pub port: u16,

    /// Disable Nagle's algorithm on every connection
    pub nodelay: bool,

    /// Connection write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,

    /// Connect timeout when joining (milliseconds)
    pub connect_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Framing Configuration
    // -------------------------------------------------------------------------
    /// How message boundaries are found in the byte stream
    pub framing: Framing,

    /// Size of a single read off the socket
    pub read_buffer_size: usize,

    /// Largest message accepted by the line and length-prefixed framers
    pub max_message_size: usize,

    // -------------------------------------------------------------------------
    // Accept Loop Configuration
    // -------------------------------------------------------------------------
    /// First backoff after a failed accept (milliseconds)
    pub accept_backoff_initial_ms: u64,

    /// Backoff ceiling (milliseconds)
    pub accept_backoff_max_ms: u64,

    /// Consecutive accept failures before the listener gives up
    pub accept_max_failures: u32,

    /// How often the idle accept loop checks for shutdown (milliseconds)
    pub accept_poll_interval_ms: u64,
}

/// Message framing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Every read is one message (compatible with peers that never frame)
    Raw,

    /// Newline-terminated messages
    Line,

    /// 4-byte big-endian length followed by the payload
    LengthPrefixed,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Framing::Raw => "raw",
            Framing::Line => "line",
            Framing::LengthPrefixed => "length",
        };
        f.write_str(name)
    }
}

impl FromStr for Framing {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Framing::Raw),
            "line" | "lines" => Ok(Framing::Line),
            "length" | "length-prefixed" => Ok(Framing::LengthPrefixed),
            other => Err(ChatError::Config(format!(
                "unknown framing '{}' (expected raw, line or length)",
                other
            ))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: "anonymous".to_string(),
            listen_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            port: DEFAULT_PORT,
            nodelay: true,
            write_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            framing: Framing::Line,
            read_buffer_size: 1024,
            max_message_size: 64 * 1024, // 64 KB
            accept_backoff_initial_ms: 50,
            accept_backoff_max_ms: 5000,
            accept_max_failures: 10,
            accept_poll_interval_ms: 50,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Write timeout as a `Duration`, `None` when disabled
    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }

    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    /// Check values that would otherwise fail deep inside the network code
    pub fn validate(&self) -> crate::Result<()> {
        if self.read_buffer_size == 0 {
            return Err(ChatError::Config("read_buffer_size must be > 0".to_string()));
        }
        if self.max_message_size == 0 {
            return Err(ChatError::Config("max_message_size must be > 0".to_string()));
        }
        if self.max_message_size > u32::MAX as usize {
            return Err(ChatError::Config(format!(
                "max_message_size {} does not fit a 4-byte length prefix",
                self.max_message_size
            )));
        }
        if self.accept_backoff_initial_ms > self.accept_backoff_max_ms {
            return Err(ChatError::Config(
                "accept_backoff_initial_ms exceeds accept_backoff_max_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the display name
    pub fn username(mut self, name: impl Into<String>) -> Self {
        self.config.username = name.into();
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the port (also rewrites the listen address port)
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self.config.listen_addr = format!("0.0.0.0:{}", port);
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the framing strategy
    pub fn framing(mut self, framing: Framing) -> Self {
        self.config.framing = framing;
        self
    }

    /// Set the read buffer size (in bytes)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the maximum message size (in bytes)
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the accept backoff range (in milliseconds)
    pub fn accept_backoff_ms(mut self, initial: u64, max: u64) -> Self {
        self.config.accept_backoff_initial_ms = initial;
        self.config.accept_backoff_max_ms = max;
        self
    }

    /// Set how many consecutive accept failures are tolerated
    pub fn accept_max_failures(mut self, count: u32) -> Self {
        self.config.accept_max_failures = count;
        self
    }

    /// Set the accept loop shutdown poll interval (in milliseconds)
    pub fn accept_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.accept_poll_interval_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
