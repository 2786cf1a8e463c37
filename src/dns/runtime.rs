//! Clock and random source backed by tokio and `rand`.

use crate::core::{Clock, RandomSource};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic clock measured from its own creation.
///
/// Built on tokio time, so a paused runtime controls it in tests.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Thread-local `rand` generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_u32(&self) -> u32 {
        rand::random()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let clock = TokioClock::new();
        assert_eq!(clock.now_ms(), 0);

        clock.sleep(Duration::from_millis(1500)).await;
        assert_eq!(clock.now_ms(), 1500);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 1750);
    }
}
