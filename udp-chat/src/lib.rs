//! `udp-chat`: a text chat service over a hand-rolled reliable-delivery
//! layer on UDP.
//!
//! # Architecture
//!
//! ```text
//!   client command loop                    server message loop
//!  ┌────────────────────┐                ┌──────────────────────┐
//!  │ ChatClient         │   envelopes    │ Server               │
//!  │  (commands/events) │◀──────────────▶│  SessionMachine      │
//!  └─────────┬──────────┘                │   └─ Directory       │
//!            │                           └──────────┬───────────┘
//!  ┌─────────▼──────────────────────────────────────▼───────────┐
//!  │ Endpoint: ReliableSender + ReliableReceiver task + Inbox   │
//!  │   START / DATA / END runs, per-frame ACKs, retransmission  │
//!  └─────────┬──────────────────────────────────────────────────┘
//!            │ checksummed frames
//!  ┌─────────▼──────┐
//!  │ Socket         │  (tokio UdpSocket, optional fault Simulator)
//!  └────────────────┘
//! ```
//!
//! Modules:
//! - [`frame`]:      wire format and checksum
//! - [`socket`]:     async UDP socket carrying frames
//! - [`simulator`]:  optional loss / duplication / corruption on send
//! - [`timer`]:      retransmission timer and retry policy
//! - [`delivery`]:   shared per-peer frame, ACK and completion tables
//! - [`sender`]:     chunking and windowed reliable send
//! - [`receiver`]:   background ACK + reassembly task
//! - [`endpoint`]:   one peer: socket, sender, receiver, inbox
//! - [`envelope`]:   application message text format
//! - [`directory`]:  username ↔ endpoint registry
//! - [`server`]:     session state machine and server loop
//! - [`state`]:      client session lifecycle
//! - [`client`]:     command parsing and client session
//! - [`config`]:     defaults and per-role configuration

pub mod client;
pub mod config;
pub mod delivery;
pub mod directory;
pub mod endpoint;
pub mod envelope;
pub mod frame;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
