//! Retransmission timer management.
//!
//! Reliable delivery requires that unacknowledged frames are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`RetryPolicy`]: the fixed retry interval plus an optional cap on the
//!   number of retransmissions.
//! - [`RetryTimer`]: a deadline and attempt counter that a sender arms once
//!   per waiting phase and consults each time it wakes up.
//!
//! There is no RTT estimation or back-off: every retransmission
//! happens exactly one interval after the previous one.

use std::time::Duration;

use tokio::time::Instant;

/// Default interval between retransmissions of an unacknowledged frame.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Adjustable retransmission parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Time to wait for an ACK before re-sending.
    pub interval: Duration,
    /// Maximum number of retransmissions per waiting phase.
    ///
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            max_retries: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval, ..Self::default() }
    }

    /// Start a timer whose first deadline is one interval from now.
    pub fn start(&self) -> RetryTimer {
        RetryTimer {
            policy: *self,
            deadline: Instant::now() + self.interval,
            retries: 0,
        }
    }
}

/// Returned by [`RetryTimer::expire`] once the policy's cap is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetriesExhausted {
    pub retries: u32,
}

/// A running retransmission timer for one waiting phase.
#[derive(Debug, Clone)]
pub struct RetryTimer {
    policy: RetryPolicy,
    deadline: Instant,
    retries: u32,
}

impl RetryTimer {
    /// When the next retransmission is due.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// `true` once the current deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Number of retransmissions performed so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Account for one retransmission and re-arm the deadline.
    ///
    /// Fails without re-arming once `max_retries` retransmissions have
    /// already been made; the caller should then give up.
    pub fn expire(&mut self) -> Result<(), RetriesExhausted> {
        if self.policy.max_retries.is_some_and(|max| self.retries >= max) {
            return Err(RetriesExhausted { retries: self.retries });
        }
        self.retries += 1;
        self.deadline = Instant::now() + self.policy.interval;
        Ok(())
    }

    /// Push the deadline a full interval out without counting a retry.
    ///
    /// Used when progress is made (a new frame enters flight).
    pub fn reset(&mut self) {
        self.deadline = Instant::now() + self.policy.interval;
    }
}
