//! Runtime configuration for the transport, the server and the client.
//!
//! Defaults mirror the classic assignment setup: server on port 15000,
//! 1400-byte chunks, a window of 3 and room for 10 clients.

use std::net::SocketAddr;

use crate::timer::RetryPolicy;

/// Largest payload carried by a single DATA frame.
pub const DEFAULT_CHUNK_SIZE: usize = 1400;

/// Default number of DATA frames allowed in flight.
pub const DEFAULT_WINDOW_SIZE: usize = 3;

/// Default server port.
pub const DEFAULT_PORT: u16 = 15000;

/// Default directory capacity.
pub const DEFAULT_CAPACITY: usize = 10;

/// Parameters of the reliable-delivery layer, shared by client and server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Maximum DATA payload per frame (≥ 1).
    pub chunk_size: usize,
    /// Retransmission interval and retry cap.
    pub retry: RetryPolicy,
    /// Maximum unacknowledged DATA frames in flight.  `0` sends every chunk
    /// as soon as START is acknowledged.
    pub window_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Maximum number of joined users.
    pub capacity: usize,
    pub transport: TransportConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            capacity: DEFAULT_CAPACITY,
            transport: TransportConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub username: String,
    pub server: SocketAddr,
    /// Local address; port 0 picks an ephemeral port.
    pub bind: SocketAddr,
    pub transport: TransportConfig,
}

impl ClientConfig {
    pub fn new(username: impl Into<String>, server: SocketAddr) -> Self {
        Self {
            username: username.into(),
            server,
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            transport: TransportConfig::default(),
        }
    }
}
