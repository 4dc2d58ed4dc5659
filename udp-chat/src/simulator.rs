//! Optional network simulator for deterministic testing.
//!
//! Real networks drop, duplicate and corrupt datagrams.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! a [`crate::socket::Socket`] can be given a [`Simulator`] that intercepts
//! every outbound frame and applies a configurable fault model:
//!
//! | Fault            | Description                                        |
//! |------------------|----------------------------------------------------|
//! | Packet loss      | Drop a frame with probability `loss_rate`.         |
//! | Targeted loss    | Drop the first frame of each kind in `drop_first`. |
//! | Duplication      | Send a frame twice.                                |
//! | Corruption       | Flip one byte so the checksum no longer verifies.  |
//!
//! Faults are applied on the sending side only; the receiving socket is
//! unaware of them.  With `seed` set, the sequence of faults is reproducible.

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::frame::{Frame, FrameKind};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`; values outside it are
/// clamped.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    /// Probability that any given frame is silently dropped.
    pub loss_rate: f64,
    /// Probability that a frame is sent twice.
    pub duplicate_rate: f64,
    /// Probability that a frame has one byte flipped.
    pub corrupt_rate: f64,
    /// RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Drop the first outbound frame of each listed kind, exactly once per entry.
    pub drop_first: Vec<FrameKind>,
}

impl SimulatorConfig {
    /// A simulator that drops the first frame of `kind` and is otherwise
    /// transparent.
    pub fn drop_first(kind: FrameKind) -> Self {
        Self { drop_first: vec![kind], ..Self::default() }
    }
}

/// Counters of what the simulator has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub passed: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub corrupted: u64,
}

#[derive(Debug)]
struct Inner {
    rng: StdRng,
    pending_drops: Vec<FrameKind>,
    stats: SimulatorStats,
}

/// A fault-injecting filter on the outbound path of a socket.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    inner: Mutex<Inner>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let pending_drops = config.drop_first.clone();
        Self {
            config,
            inner: Mutex::new(Inner { rng, pending_drops, stats: SimulatorStats::default() }),
        }
    }

    /// Decide the fate of one encoded frame.
    ///
    /// Returns the datagrams that should actually hit the wire: none when
    /// the frame is lost, two when it is duplicated.
    pub fn apply(&self, frame: &Frame, encoded: Vec<u8>) -> Vec<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(i) = inner.pending_drops.iter().position(|k| *k == frame.kind) {
            inner.pending_drops.remove(i);
            inner.stats.dropped += 1;
            log::debug!("[sim] dropping first {} seq={}", frame.kind, frame.seq);
            return Vec::new();
        }

        if chance(&mut inner.rng, self.config.loss_rate) {
            inner.stats.dropped += 1;
            log::debug!("[sim] lost {} seq={}", frame.kind, frame.seq);
            return Vec::new();
        }

        let mut bytes = encoded;
        if chance(&mut inner.rng, self.config.corrupt_rate) && !bytes.is_empty() {
            let idx = inner.rng.random_range(0..bytes.len());
            bytes[idx] ^= 0x5a;
            inner.stats.corrupted += 1;
            log::debug!("[sim] corrupted {} seq={} at byte {idx}", frame.kind, frame.seq);
        }

        if chance(&mut inner.rng, self.config.duplicate_rate) {
            inner.stats.duplicated += 1;
            log::debug!("[sim] duplicated {} seq={}", frame.kind, frame.seq);
            return vec![bytes.clone(), bytes];
        }

        inner.stats.passed += 1;
        vec![bytes]
    }

    pub fn stats(&self) -> SimulatorStats {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).stats
    }
}

fn chance(rng: &mut StdRng, p: f64) -> bool {
    let p = p.clamp(0.0, 1.0);
    p > 0.0 && rng.random_bool(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;

    fn datagrams(sim: &Simulator, frame: &Frame) -> Vec<Vec<u8>> {
        sim.apply(frame, frame.encode())
    }

    #[test]
    fn default_config_is_transparent() {
        let sim = Simulator::new(SimulatorConfig::default());
        let f = Frame::data(5, b"abc".to_vec());
        assert_eq!(datagrams(&sim, &f), vec![f.encode()]);
        assert_eq!(sim.stats().passed, 1);
    }

    #[test]
    fn drop_first_only_drops_once() {
        let sim = Simulator::new(SimulatorConfig::drop_first(FrameKind::Data));
        let start = Frame::start(1);
        let data = Frame::data(2, b"x".to_vec());

        assert_eq!(datagrams(&sim, &start).len(), 1);
        assert!(datagrams(&sim, &data).is_empty());
        assert_eq!(datagrams(&sim, &data).len(), 1);
        assert_eq!(sim.stats().dropped, 1);
    }

    #[test]
    fn full_loss_drops_everything() {
        let sim = Simulator::new(SimulatorConfig { loss_rate: 1.0, seed: Some(1), ..Default::default() });
        for seq in 0..20 {
            assert!(datagrams(&sim, &Frame::start(seq)).is_empty());
        }
        assert_eq!(sim.stats().dropped, 20);
    }

    #[test]
    fn duplication_sends_identical_copies() {
        let sim = Simulator::new(SimulatorConfig { duplicate_rate: 1.0, seed: Some(7), ..Default::default() });
        let f = Frame::end(9);
        let out = datagrams(&sim, &f);
        assert_eq!(out, vec![f.encode(), f.encode()]);
    }

    #[test]
    fn corruption_breaks_the_checksum() {
        let sim = Simulator::new(SimulatorConfig { corrupt_rate: 1.0, seed: Some(3), ..Default::default() });
        let f = Frame::data(77, b"payload".to_vec());
        let out = datagrams(&sim, &f);
        assert_eq!(out.len(), 1);
        assert!(!frame::validate(&out[0]));
    }

    #[test]
    fn same_seed_gives_same_faults() {
        let cfg = SimulatorConfig { loss_rate: 0.5, seed: Some(42), ..Default::default() };
        let a = Simulator::new(cfg.clone());
        let b = Simulator::new(cfg);
        let fa: Vec<usize> = (0..50).map(|s| datagrams(&a, &Frame::start(s)).len()).collect();
        let fb: Vec<usize> = (0..50).map(|s| datagrams(&b, &Frame::start(s)).len()).collect();
        assert_eq!(fa, fb);
    }
}
