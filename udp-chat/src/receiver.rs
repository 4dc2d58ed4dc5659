//! Inbound side of the reliable-delivery layer.
//!
//! The [`ReliableReceiver`] runs as a background task that owns the read
//! half of a peer's socket.  For every datagram it:
//! - drops anything that fails to decode or whose checksum does not verify
//!   (no negative acknowledgement; the sender's timer recovers),
//! - records START / DATA frames and immediately ACKs them,
//! - on END, records the frame and attempts reassembly:
//!   * complete and new → ACK, then hand the message to the FIFO queue;
//!   * already delivered → ACK again, deliver nothing;
//!   * incomplete → stay silent until a later END retransmission,
//! - records ACK frames so that waiting senders observe them.
//!
//! The receiver never blocks on the consumer: the handoff queue is unbounded.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::delivery::{DeliveryState, Reassembly};
use crate::endpoint::TransportError;
use crate::frame::{Frame, FrameKind};
use crate::socket::{Socket, SocketError};

/// A reassembled application message and the endpoint it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub from: SocketAddr,
    pub payload: Vec<u8>,
}

/// Items placed on the handoff queue.
pub type Inbound = Result<Delivery, TransportError>;

/// Background demultiplexer for one peer's socket.
#[derive(Debug)]
pub struct ReliableReceiver {
    socket: Arc<Socket>,
    state: Arc<DeliveryState>,
    queue: mpsc::UnboundedSender<Inbound>,
}

impl ReliableReceiver {
    pub fn new(
        socket: Arc<Socket>,
        state: Arc<DeliveryState>,
        queue: mpsc::UnboundedSender<Inbound>,
    ) -> Self {
        Self { socket, state, queue }
    }

    /// Run [`ReliableReceiver::run`] on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Receive until the socket fails or nobody is listening on the queue.
    ///
    /// A fatal socket error is forwarded to the queue before returning.
    pub async fn run(self) {
        loop {
            let (frame, from) = tokio::select! {
                _ = self.queue.closed() => {
                    log::debug!("[recv] queue closed; stopping");
                    return;
                }
                result = self.socket.recv_from() => match result {
                    Ok(v) => v,
                    Err(e) if e.is_per_datagram() => {
                        log::debug!("[recv] dropping datagram: {e}");
                        continue;
                    }
                    Err(e) => {
                        log::warn!("[recv] socket failed: {e}");
                        let _ = self.queue.send(Err(TransportError::Socket(e)));
                        return;
                    }
                },
            };

            if let Some(delivery) = self.handle_frame(frame, from).await {
                if self.queue.send(Ok(delivery)).is_err() {
                    return;
                }
            }
        }
    }

    /// Apply one verified frame to the delivery state.
    ///
    /// Returns the reassembled message when `frame` completes a new run.
    pub async fn handle_frame(&self, frame: Frame, from: SocketAddr) -> Option<Delivery> {
        match frame.kind {
            FrameKind::Start | FrameKind::Data => {
                log::debug!("[recv] ← {} seq={} len={} from {from}", frame.kind, frame.seq, frame.payload.len());
                self.state.with(|t| t.record_frame(from, &frame));
                self.ack(frame.seq, from).await;
                None
            }
            FrameKind::End => {
                let outcome = self.state.with(|t| {
                    t.record_frame(from, &frame);
                    t.reassemble_from(from, frame.seq)
                });
                match outcome {
                    Reassembly::Complete(payload) => {
                        log::debug!("[recv] ← end seq={} from {from}: {} byte message", frame.seq, payload.len());
                        self.ack(frame.seq, from).await;
                        Some(Delivery { from, payload })
                    }
                    Reassembly::AlreadyDelivered => {
                        log::debug!("[recv] ← end seq={} from {from}: duplicate run, re-ACK", frame.seq);
                        self.ack(frame.seq, from).await;
                        None
                    }
                    Reassembly::Incomplete => {
                        log::debug!("[recv] ← end seq={} from {from}: gap in run, waiting", frame.seq);
                        None
                    }
                }
            }
            FrameKind::Ack => {
                log::debug!("[recv] ← ack seq={} from {from}", frame.seq);
                self.state.record_ack(from, frame.seq);
                None
            }
        }
    }

    async fn ack(&self, seq: u64, to: SocketAddr) {
        if let Err(e) = self.socket.send_to(&Frame::ack_for(seq), to).await {
            log::warn!("[recv] failed to ACK seq={seq} to {to}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::split_into_frames;

    async fn receiver() -> (ReliableReceiver, mpsc::UnboundedReceiver<Inbound>, Socket) {
        let sock = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let peer = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        (ReliableReceiver::new(Arc::new(sock), Arc::new(DeliveryState::new()), tx), rx, peer)
    }

    async fn next_ack(peer: &Socket) -> u64 {
        let (frame, _) = tokio::time::timeout(std::time::Duration::from_secs(2), peer.recv_from())
            .await
            .expect("ack expected")
            .unwrap();
        assert_eq!(frame.kind, FrameKind::Ack);
        frame.seq
    }

    #[tokio::test]
    async fn every_frame_of_a_run_is_acked_and_message_delivered() {
        let (r, _rx, peer) = receiver().await;
        let from = peer.local_addr;
        let frames = split_into_frames(b"join 1 alice", 300, 5);

        let mut delivered = None;
        for f in frames.clone() {
            delivered = r.handle_frame(f, from).await;
        }
        for f in &frames {
            assert_eq!(next_ack(&peer).await, f.seq + 1);
        }
        assert_eq!(delivered, Some(Delivery { from, payload: b"join 1 alice".to_vec() }));
    }

    #[tokio::test]
    async fn end_with_gap_is_not_acked() {
        let (r, _rx, peer) = receiver().await;
        let from = peer.local_addr;
        let frames = split_into_frames(b"abcdef", 10, 2);

        // Skip the second DATA frame.
        for f in frames.iter().filter(|f| f.seq != 12) {
            assert_eq!(r.handle_frame(f.clone(), from).await, None);
        }
        // START and two DATA ACKs, but nothing for END.
        assert_eq!(next_ack(&peer).await, 11);
        assert_eq!(next_ack(&peer).await, 12);
        assert_eq!(next_ack(&peer).await, 14);
        let silent = tokio::time::timeout(std::time::Duration::from_millis(100), peer.recv_from()).await;
        assert!(silent.is_err(), "END must not be acknowledged while a chunk is missing");
    }

    #[tokio::test]
    async fn duplicate_end_is_reacked_but_not_redelivered() {
        let (r, _rx, peer) = receiver().await;
        let from = peer.local_addr;
        let frames = split_into_frames(b"hi", 50, 10);
        let end = frames.last().unwrap().clone();

        for f in frames {
            r.handle_frame(f, from).await;
        }
        assert_eq!(r.handle_frame(end.clone(), from).await, None);
        for _ in 0..3 {
            next_ack(&peer).await;
        }
        assert_eq!(next_ack(&peer).await, end.seq + 1);
    }

    #[tokio::test]
    async fn ack_frames_are_recorded() {
        let (r, _rx, peer) = receiver().await;
        let from = peer.local_addr;
        r.state.with(|t| t.record_sent(from, Frame::data(77, b"x".to_vec())));
        assert_eq!(r.handle_frame(Frame::ack_for(77), from).await, None);
        assert!(r.state.with(|t| t.is_acked(from, 77)));
    }
}
