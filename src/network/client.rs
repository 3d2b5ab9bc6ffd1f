//! TCP Client
//!
//! Joins a host and runs the reader thread for the upstream connection.

use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::Config;
use crate::error::{ChatError, Result};
use super::{Connection, PeerHandler, PeerRole, PeerSet, ReaderLoop, UpstreamSlot};

/// Resolve a join target
///
/// Accepts `ip`, `ip:port`, `host:port` or a bare hostname; a missing port
/// defaults to `default_port`.
pub fn resolve_target(target: &str, default_port: u16) -> Result<Vec<SocketAddr>> {
    let target = target.trim();
    if target.is_empty() {
        return Err(ChatError::Config("empty address".to_string()));
    }

    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Ok(vec![addr]);
    }
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, default_port)]);
    }

    let with_port = if target.contains(':') {
        target.to_string()
    } else {
        format!("{}:{}", target, default_port)
    };

    let addrs: Vec<SocketAddr> = with_port
        .to_socket_addrs()
        .map_err(|source| ChatError::Connect {
            addr: target.to_string(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ChatError::Config(format!("'{}' resolved to no addresses", target)));
    }
    Ok(addrs)
}

/// A client joined to a single host
pub struct Client {
    connection: Arc<Connection>,
    reader: JoinHandle<()>,
}

impl Client {
    /// Connect to `target`, register it as the upstream and start reading
    pub fn connect(
        target: &str,
        config: &Config,
        upstream: Arc<UpstreamSlot>,
        handler: Arc<dyn PeerHandler>,
    ) -> Result<Self> {
        let stream = Self::open_stream(target, config)?;
        let connection = Arc::new(Connection::new(stream, PeerRole::Upstream, config)?);

        if !upstream.add(Arc::clone(&connection)) {
            connection.close();
            return Err(ChatError::Config("already joined to a host".to_string()));
        }

        tracing::info!("Connected to {} ({})", connection.peer_addr(), connection.id());

        let peers: Arc<dyn PeerSet> = upstream.clone();
        let reader = ReaderLoop::new(Arc::clone(&connection), peers, handler, config);
        let reader = match reader.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                upstream.remove(connection.id());
                connection.close();
                return Err(e);
            }
        };

        Ok(Self { connection, reader })
    }

    fn open_stream(target: &str, config: &Config) -> Result<TcpStream> {
        let addrs = resolve_target(target, config.port)?;

        let mut last_err = None;
        for addr in &addrs {
            tracing::debug!("Connecting to {}", addr);
            match TcpStream::connect_timeout(addr, config.connect_timeout()) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        let source = last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address to connect to")
        });
        Err(ChatError::Connect {
            addr: target.to_string(),
            source,
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Give up ownership of the reader thread
    pub fn into_reader(self) -> JoinHandle<()> {
        self.reader
    }
}
