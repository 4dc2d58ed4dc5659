//! Outbound side of the reliable-delivery layer.
//!
//! [`ReliableSender::send`] turns one application message into a run of
//! frames and does not return until every frame of the run is acknowledged:
//!
//! ```text
//!  START(S) ──ack S+1──▶ DATA(S+1) … DATA(S+N) ──acks──▶ END(S+N+1) ──ack S+N+2──▶ done
//! ```
//!
//! # Contract
//! - `S` is drawn at random for every message.
//! - START must be acknowledged before any DATA leaves.
//! - At most `window_size` DATA frames are unacknowledged at once
//!   (`0` = all of them).  Only the frames still missing an ACK are re-sent
//!   when the retry interval elapses (selective retransmission).
//! - END is sent once every DATA frame is acknowledged.
//!
//! Waiting is driven by [`DeliveryState::ack_notified`]: the sender sleeps
//! until either an ACK is recorded or the retry deadline passes.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;

use rand::Rng;

use crate::config::TransportConfig;
use crate::delivery::DeliveryState;
use crate::endpoint::TransportError;
use crate::frame::Frame;
use crate::socket::Socket;

/// Range the starting sequence number is drawn from.
const START_SEQ_RANGE: RangeInclusive<u64> = 10_000..=u32::MAX as u64;

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// The frames carrying one message: START, the DATA chunks in order, END.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub start: Frame,
    pub data: Vec<Frame>,
    pub end: Frame,
}

impl Run {
    /// Chunk `message` into a run starting at `start_seq`.
    ///
    /// A `chunk_size` of zero is treated as one.  An empty message yields no
    /// DATA frames.
    pub fn new(message: &[u8], start_seq: u64, chunk_size: usize) -> Self {
        let data: Vec<Frame> = message
            .chunks(chunk_size.max(1))
            .zip(start_seq + 1..)
            .map(|(chunk, seq)| Frame::data(seq, chunk.to_vec()))
            .collect();
        let end_seq = start_seq + data.len() as u64 + 1;
        Self {
            start: Frame::start(start_seq),
            data,
            end: Frame::end(end_seq),
        }
    }

    pub fn into_frames(self) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(self.data.len() + 2);
        frames.push(self.start);
        frames.extend(self.data);
        frames.push(self.end);
        frames
    }
}

/// All frames of the run for `message`, in sequence order.
pub fn split_into_frames(message: &[u8], start_seq: u64, chunk_size: usize) -> Vec<Frame> {
    Run::new(message, start_seq, chunk_size).into_frames()
}

fn random_start_seq() -> u64 {
    rand::rng().random_range(START_SEQ_RANGE)
}

// ---------------------------------------------------------------------------
// ReliableSender
// ---------------------------------------------------------------------------

/// Cloneable handle that reliably transmits whole messages.
///
/// Clones share the socket and the delivery state, so several sends (to the
/// same or different peers) may run concurrently.
#[derive(Debug, Clone)]
pub struct ReliableSender {
    socket: Arc<Socket>,
    state: Arc<DeliveryState>,
    config: TransportConfig,
}

impl ReliableSender {
    pub fn new(socket: Arc<Socket>, state: Arc<DeliveryState>, config: TransportConfig) -> Self {
        Self { socket, state, config }
    }

    /// Deliver `message` to `dest`, blocking until the whole run is acknowledged.
    ///
    /// Retries forever unless the retry policy sets `max_retries`.  Dropping
    /// the returned future abandons the send.
    pub async fn send(&self, message: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        let run = Run::new(message, random_start_seq(), self.config.chunk_size);
        log::debug!(
            "[send] {} byte(s) to {dest} as run {}..={} ({} chunk(s))",
            message.len(),
            run.start.seq,
            run.end.seq,
            run.data.len()
        );

        self.deliver(vec![run.start], 1, dest).await?;
        let window = match self.config.window_size {
            0 => usize::MAX,
            n => n,
        };
        self.deliver(run.data, window, dest).await?;
        self.deliver(vec![run.end], 1, dest).await?;
        Ok(())
    }

    /// Send `frames` with at most `window` unacknowledged at a time and wait
    /// until every one of them is acknowledged.
    async fn deliver(
        &self,
        frames: Vec<Frame>,
        window: usize,
        dest: SocketAddr,
    ) -> Result<(), TransportError> {
        let mut pending = frames.into_iter();
        let mut guard = InFlight { state: &self.state, dest, seqs: BTreeSet::new() };
        let in_flight = &mut guard.seqs;
        let mut timer = self.config.retry.start();

        loop {
            while in_flight.len() < window {
                let Some(frame) = pending.next() else { break };
                log::debug!("[send] → {} seq={} len={}", frame.kind, frame.seq, frame.payload.len());
                in_flight.insert(frame.seq);
                self.state.with(|t| t.record_sent(dest, frame.clone()));
                self.socket.send_to(&frame, dest).await?;
            }
            if in_flight.is_empty() {
                return Ok(());
            }

            // Register interest before looking, so an ACK recorded between
            // the check and the sleep still wakes us.
            let notified = self.state.ack_notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let before = in_flight.len();
            self.state.with(|t| in_flight.retain(|seq| !t.take_ack(dest, *seq)));
            if in_flight.len() < before {
                log::debug!("[send] ← {} ACK(s) from {dest}, {} in flight", before - in_flight.len(), in_flight.len());
                timer = self.config.retry.start();
                continue;
            }

            if timer.is_expired() {
                let oldest = in_flight.first().copied().unwrap_or_default();
                timer
                    .expire()
                    .map_err(|_| TransportError::RetriesExhausted { seq: oldest })?;
                let resend: Vec<Frame> = self.state.with(|t| {
                    in_flight.iter().filter_map(|seq| t.unacked(dest, *seq).cloned()).collect()
                });
                log::debug!(
                    "[send] timeout #{}, retransmitting {} frame(s) to {dest}",
                    timer.retries(),
                    resend.len()
                );
                for frame in &resend {
                    self.socket.send_to(frame, dest).await?;
                }
                continue;
            }

            // Either an ACK arrived or the deadline passed; both are
            // re-examined at the top of the loop.
            let _ = tokio::time::timeout_at(timer.deadline(), notified).await;
        }
    }
}

/// Sequence numbers sent to `dest` and not yet acknowledged.
///
/// Whatever is left when this drops (retry cap reached, send cancelled) is
/// removed from the shared tables.
struct InFlight<'a> {
    state: &'a DeliveryState,
    dest: SocketAddr,
    seqs: BTreeSet<u64>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.seqs.is_empty() {
            return;
        }
        log::debug!("[send] abandoning {} frame(s) to {}", self.seqs.len(), self.dest);
        self.state.with(|t| {
            for seq in &self.seqs {
                t.forget_sent(self.dest, *seq);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameKind;

    #[test]
    fn run_sequence_numbers_are_contiguous() {
        let frames = split_into_frames(b"abcdefg", 1000, 3);
        let kinds: Vec<FrameKind> = frames.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![FrameKind::Start, FrameKind::Data, FrameKind::Data, FrameKind::Data, FrameKind::End]
        );
        let seqs: Vec<u64> = frames.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![1000, 1001, 1002, 1003, 1004]);
        assert_eq!(frames[3].payload, b"g");
    }

    #[test]
    fn single_chunk_message_has_data_then_empty_end() {
        let run = Run::new(b"abc", 10, 3);
        assert_eq!(run.data.len(), 1);
        assert_eq!(run.data[0].payload, b"abc");
        assert!(run.end.payload.is_empty());
        assert_eq!(run.end.seq, 12);
    }

    #[test]
    fn empty_message_is_start_then_end() {
        let run = Run::new(b"", 10, 1400);
        assert!(run.data.is_empty());
        assert_eq!(run.end.seq, 11);
    }

    #[test]
    fn zero_chunk_size_is_treated_as_one() {
        let run = Run::new(b"ab", 0, 0);
        assert_eq!(run.data.len(), 2);
    }

    #[test]
    fn abandoned_frames_are_forgotten() {
        let state = DeliveryState::new();
        let dest = SocketAddr::from(([127, 0, 0, 1], 9));
        state.with(|t| {
            t.record_sent(dest, Frame::data(5, b"a".to_vec()));
            t.record_sent(dest, Frame::data(6, b"b".to_vec()));
        });
        {
            let mut in_flight = InFlight { state: &state, dest, seqs: BTreeSet::new() };
            in_flight.seqs.insert(5);
        }
        assert!(state.with(|t| t.unacked(dest, 5).is_none()));
        assert!(state.with(|t| t.unacked(dest, 6).is_some()));
    }

    #[test]
    fn random_start_is_in_range() {
        for _ in 0..100 {
            assert!(START_SEQ_RANGE.contains(&random_start_seq()));
        }
    }
}
