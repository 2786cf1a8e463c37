//! Handshake retry schedule
//!
//! Session establishment retries the DTLS handshake with a per-attempt
//! receive timeout that doubles after every failed attempt, bounded by an
//! overall deadline. The schedule is kept free of I/O so it can be driven
//! with plain millisecond values.

use std::time::Duration;

/// Timeout of the attempt following one that used `previous`, never
/// exceeding what is left of the overall budget.
pub fn next_timeout(previous: Duration, remaining: Duration) -> Duration {
    previous.saturating_mul(2).min(remaining)
}

/// Retry state of one session-establishment loop.
#[derive(Debug, Clone)]
pub struct HandshakeBackoff {
    started_ms: u64,
    deadline: Duration,
    timeout: Duration,
    attempts: u32,
}

impl HandshakeBackoff {
    /// Starts a schedule at `now_ms` with the given overall deadline and
    /// first-attempt timeout.
    pub fn new(now_ms: u64, deadline: Duration, initial_timeout: Duration) -> Self {
        Self {
            started_ms: now_ms,
            deadline,
            timeout: initial_timeout,
            attempts: 0,
        }
    }

    /// Budget left before the deadline.
    pub fn remaining(&self, now_ms: u64) -> Duration {
        let elapsed = Duration::from_millis(now_ms.saturating_sub(self.started_ms));
        self.deadline.saturating_sub(elapsed)
    }

    /// Begins the next attempt and returns its receive timeout, or `None`
    /// once the deadline has passed.
    pub fn next_attempt(&mut self, now_ms: u64) -> Option<Duration> {
        let remaining = self.remaining(now_ms);
        if remaining.is_zero() {
            return None;
        }
        self.attempts += 1;
        Some(self.timeout.min(remaining))
    }

    /// Records a failed attempt, backing off for the next one.
    pub fn record_failure(&mut self, now_ms: u64) {
        self.timeout = next_timeout(self.timeout, self.remaining(now_ms));
    }

    /// Timeout the next attempt will use before clamping to the deadline.
    pub fn current_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
