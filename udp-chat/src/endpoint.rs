//! One peer of the reliable-delivery layer.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  send(msg, dest)                         recv()
//!      ▼                                            ▲
//!  ReliableSender ──frames──▶ ┌────────┐            │ FIFO (unbounded mpsc)
//!      ▲                      │ Socket │──frames──▶ ReliableReceiver task
//!      │ ack wakeups          └────────┘            │
//!      └──────────── Arc<DeliveryState> ◀───────────┘
//! ```
//!
//! An [`Endpoint`] binds the socket, spawns the receiver task and hands out
//! cloneable [`ReliableSender`]s.  Dropping the endpoint stops the receiver
//! task.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::TransportConfig;
use crate::delivery::DeliveryState;
use crate::receiver::{Delivery, Inbound, ReliableReceiver};
use crate::sender::ReliableSender;
use crate::simulator::SimulatorConfig;
use crate::socket::{Socket, SocketError};

/// Errors surfaced by the reliable-delivery layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// The retry policy's cap was reached without an acknowledgement.
    #[error("no acknowledgement for seq {seq} within the retry limit")]
    RetriesExhausted { seq: u64 },
    /// The receiver task has stopped and no more messages will arrive.
    #[error("endpoint closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

/// Consumer end of the handoff queue.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

impl Inbox {
    /// Wait for the next reassembled message.
    ///
    /// Returns [`TransportError::Closed`] once the receiver task is gone.
    pub async fn recv(&mut self) -> Result<Delivery, TransportError> {
        self.rx.recv().await.unwrap_or(Err(TransportError::Closed))
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Endpoint {
    socket: Arc<Socket>,
    sender: ReliableSender,
    inbox: Inbox,
}

impl Endpoint {
    /// Bind `addr` and start receiving.
    pub async fn bind(addr: SocketAddr, config: TransportConfig) -> Result<Self, TransportError> {
        Ok(Self::from_socket(Socket::bind(addr).await?, config))
    }

    /// Like [`Endpoint::bind`], with outbound frames passed through a fault
    /// simulator.
    pub async fn bind_simulated(
        addr: SocketAddr,
        config: TransportConfig,
        faults: SimulatorConfig,
    ) -> Result<Self, TransportError> {
        Ok(Self::from_socket(Socket::bind_simulated(addr, faults).await?, config))
    }

    /// Wrap an already-bound socket.  Must be called inside a tokio runtime.
    pub fn from_socket(socket: Socket, config: TransportConfig) -> Self {
        let socket = Arc::new(socket);
        let state = Arc::new(DeliveryState::new());
        let (tx, rx) = mpsc::unbounded_channel();

        ReliableReceiver::new(socket.clone(), state.clone(), tx).spawn();
        log::debug!("[endpoint] listening on {}", socket.local_addr);

        Self {
            sender: ReliableSender::new(socket.clone(), state, config),
            socket,
            inbox: Inbox { rx },
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// A handle for sending; clones may be moved into other tasks.
    pub fn sender(&self) -> ReliableSender {
        self.sender.clone()
    }

    /// Reliably deliver `message` to `dest`.  See [`ReliableSender::send`].
    pub async fn send(&self, message: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        self.sender.send(message, dest).await
    }

    /// Wait for the next reassembled message.
    pub async fn recv(&mut self) -> Result<Delivery, TransportError> {
        self.inbox.recv().await
    }
}
