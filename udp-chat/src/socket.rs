//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::frame::Frame`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O and, in tests, the optional
//! [`crate::simulator::Simulator`] on the outbound path.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::frame::{Frame, FrameError};
use crate::simulator::{Simulator, SimulatorConfig};

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The received datagram could not be decoded as a valid frame.
    #[error("frame decode error: {0}")]
    Frame(#[from] FrameError),
}

impl SocketError {
    /// `true` when the error concerns a single bad datagram rather than the
    /// socket itself.  Such errors are dropped and the receive loop goes on.
    pub fn is_per_datagram(&self) -> bool {
        match self {
            Self::Frame(_) => true,
            // ICMP port-unreachable from an earlier send surfaces on the next
            // recv on some platforms; it says nothing about this socket.
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionRefused
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, frame-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    simulator: Option<Simulator>,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner, simulator: None })
    }

    /// Bind a socket whose outbound frames pass through a fault simulator.
    pub async fn bind_simulated(
        local_addr: SocketAddr,
        config: SimulatorConfig,
    ) -> Result<Self, SocketError> {
        let mut socket = Self::bind(local_addr).await?;
        socket.simulator = Some(Simulator::new(config));
        Ok(socket)
    }

    pub fn simulator(&self) -> Option<&Simulator> {
        self.simulator.as_ref()
    }

    /// Encode `frame` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, frame: &Frame, dest: SocketAddr) -> Result<(), SocketError> {
        let bytes = frame.encode();
        match &self.simulator {
            None => {
                self.inner.send_to(&bytes, dest).await?;
            }
            Some(sim) => {
                for datagram in sim.apply(frame, bytes) {
                    self.inner.send_to(&datagram, dest).await?;
                }
            }
        }
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Frame`].
    ///
    /// Returns `(frame, sender_address)`.  Datagrams that fail to decode are
    /// returned as `Err`; the caller decides whether to retry.
    pub async fn recv_from(&self) -> Result<(Frame, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let frame = Frame::decode(&buf[..n])?;
        Ok((frame, addr))
    }
}
