//! Delivery state shared by the reliable sender and receiver of one peer.
//!
//! [`RunTable`] holds every map the two sides read and mutate:
//!
//! | Table        | Key              | Written by | Read by  |
//! |--------------|------------------|------------|----------|
//! | `payloads`   | (peer, seq)      | receiver   | receiver |
//! | `kinds`      | (peer, seq)      | receiver   | receiver |
//! | `unacked`    | (peer, seq)      | sender     | sender   |
//! | `acks`       | (peer, ack seq)  | receiver   | sender   |
//! | `delivered`  | peer → START..=END | receiver | receiver |
//!
//! Keys carry the remote address so that runs from different peers never
//! share a sequence space.
//!
//! A run's payloads and kinds are dropped as soon as it is reassembled; only
//! its sequence range stays in `delivered`, which is enough to re-ACK a
//! retransmitted END and to ignore late copies of its other frames.  An ACK
//! is kept only while its frame is still in `unacked`, so duplicate ACKs
//! leave nothing behind.
//!
//! [`DeliveryState`] puts the table behind a single mutex and pairs it with a
//! [`Notify`] that wakes waiting senders whenever an ACK is recorded.  No
//! lock is ever held across an `.await`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::frame::{Frame, FrameKind};

type RunKey = (SocketAddr, u64);

/// Outcome of walking a run backwards from its END frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// A new, complete run; the concatenated payload.
    Complete(Vec<u8>),
    /// A predecessor is missing; retransmission will fill the gap.
    Incomplete,
    /// The run reached a START that was delivered before.
    AlreadyDelivered,
}

// ---------------------------------------------------------------------------
// RunTable
// ---------------------------------------------------------------------------

/// Plain (unsynchronised) delivery tables.
#[derive(Debug, Default)]
pub struct RunTable {
    payloads: HashMap<RunKey, Vec<u8>>,
    kinds: HashMap<RunKey, FrameKind>,
    unacked: HashMap<RunKey, Frame>,
    acks: HashSet<RunKey>,
    /// Per peer, START seq → END seq of every delivered run.
    delivered: HashMap<SocketAddr, BTreeMap<u64, u64>>,
}

impl RunTable {
    // -- receive side -------------------------------------------------------

    /// Remember an inbound START, DATA or END frame.
    ///
    /// A retransmitted frame overwrites its earlier copy, which is identical.
    /// Frames of a run that was already delivered are not stored again.
    pub fn record_frame(&mut self, from: SocketAddr, frame: &Frame) {
        debug_assert!(frame.kind != FrameKind::Ack, "ACKs go through record_ack");
        if self.is_delivered(from, frame.seq) {
            return;
        }
        self.payloads.insert((from, frame.seq), frame.payload.clone());
        self.kinds.insert((from, frame.seq), frame.kind);
    }

    /// Rebuild the message whose END frame carries `end_seq`.
    ///
    /// Walks from `end_seq - 1` down to the run's START, collecting payloads.
    /// A missing sequence number, or a frame that cannot sit inside a run,
    /// makes the run [`Reassembly::Incomplete`].  An END inside a run that
    /// was delivered before yields [`Reassembly::AlreadyDelivered`].
    /// Otherwise the run's range is marked delivered, its frames are
    /// released and the payload returned.
    pub fn reassemble_from(&mut self, from: SocketAddr, end_seq: u64) -> Reassembly {
        if self.is_delivered(from, end_seq) {
            return Reassembly::AlreadyDelivered;
        }
        let mut chunks: Vec<&[u8]> = Vec::new();
        let mut seq = end_seq;
        let start_seq = loop {
            let Some(prev) = seq.checked_sub(1) else {
                return Reassembly::Incomplete;
            };
            seq = prev;
            match self.kinds.get(&(from, seq)) {
                Some(FrameKind::Start) => break seq,
                Some(FrameKind::Data) => {
                    if let Some(payload) = self.payloads.get(&(from, seq)) {
                        chunks.push(payload);
                    }
                }
                Some(FrameKind::End | FrameKind::Ack) | None => return Reassembly::Incomplete,
            }
        };

        let message: Vec<u8> = chunks.iter().rev().flat_map(|c| c.iter().copied()).collect();
        for seq in start_seq..=end_seq {
            self.payloads.remove(&(from, seq));
            self.kinds.remove(&(from, seq));
        }
        self.delivered.entry(from).or_default().insert(start_seq, end_seq);
        Reassembly::Complete(message)
    }

    /// `true` when `seq` falls inside a run already delivered from `from`.
    pub fn is_delivered(&self, from: SocketAddr, seq: u64) -> bool {
        self.delivered
            .get(&from)
            .and_then(|runs| runs.range(..=seq).next_back())
            .is_some_and(|(_, &end)| seq <= end)
    }

    // -- send side ----------------------------------------------------------

    /// Record an ACK frame received from `from`.
    ///
    /// Only an ACK for a frame still in `unacked` is kept; a duplicate or
    /// unsolicited ACK is dropped.
    pub fn record_ack(&mut self, from: SocketAddr, ack_seq: u64) {
        // The ACK for seq k carries k + 1.
        let Some(acked) = ack_seq.checked_sub(1) else { return };
        if self.unacked.remove(&(from, acked)).is_some() {
            self.acks.insert((from, ack_seq));
        }
    }

    /// `true` when `peer` has acknowledged the frame with sequence `seq`.
    pub fn is_acked(&self, peer: SocketAddr, seq: u64) -> bool {
        self.acks.contains(&(peer, seq + 1))
    }

    /// Consume the ACK for `seq` if it has arrived.
    pub fn take_ack(&mut self, peer: SocketAddr, seq: u64) -> bool {
        self.acks.remove(&(peer, seq + 1))
    }

    /// Place a frame into the sent-but-unacknowledged table.
    pub fn record_sent(&mut self, dest: SocketAddr, frame: Frame) {
        self.unacked.insert((dest, frame.seq), frame);
    }

    /// The unacknowledged frame sent to `dest` with sequence `seq`.
    pub fn unacked(&self, dest: SocketAddr, seq: u64) -> Option<&Frame> {
        self.unacked.get(&(dest, seq))
    }

    /// Drop every trace of the frame sent to `dest` with sequence `seq`,
    /// for a send that will no longer wait for it.
    pub fn forget_sent(&mut self, dest: SocketAddr, seq: u64) {
        self.unacked.remove(&(dest, seq));
        self.acks.remove(&(dest, seq + 1));
    }
}

// ---------------------------------------------------------------------------
// DeliveryState
// ---------------------------------------------------------------------------

/// [`RunTable`] behind one mutex, plus the ACK wakeup.
#[derive(Debug, Default)]
pub struct DeliveryState {
    table: Mutex<RunTable>,
    ack_arrived: Notify,
}

impl DeliveryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as one critical section over the tables.
    pub fn with<R>(&self, f: impl FnOnce(&mut RunTable) -> R) -> R {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut table)
    }

    /// Record an ACK and wake every sender waiting for one.
    pub fn record_ack(&self, from: SocketAddr, ack_seq: u64) {
        self.with(|t| t.record_ack(from, ack_seq));
        self.ack_arrived.notify_waiters();
    }

    /// A future that completes at the next [`record_ack`](Self::record_ack).
    ///
    /// Call `enable()` on the pinned future *before* checking the tables so
    /// that an ACK landing in between is not missed.
    pub fn ack_notified(&self) -> Notified<'_> {
        self.ack_arrived.notified()
    }
}
