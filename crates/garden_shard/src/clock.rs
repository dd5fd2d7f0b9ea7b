//! Millisecond wall clock anchored to tokio's time source.
//!
//! Reading time through tokio's `Instant` keeps every timer and every
//! `now_ms()` on the same source, which also lets tests drive growth with
//! a paused runtime clock.

use crate::types::Millis;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor: Instant,
    anchor_ms: Millis,
}

impl Clock {
    /// Clock reading the current wall time.
    pub fn new() -> Self {
        Self::starting_at(Self::system_ms())
    }

    /// Clock whose `now_ms()` reads `ms` at the moment of construction.
    pub fn starting_at(ms: Millis) -> Self {
        Self {
            anchor: Instant::now(),
            anchor_ms: ms,
        }
    }

    pub fn now_ms(&self) -> Millis {
        let elapsed = self.anchor.elapsed().as_millis();
        self.anchor_ms
            .saturating_add(Millis::try_from(elapsed).unwrap_or(Millis::MAX))
    }

    /// Runtime instant at which `now_ms()` reaches `ms`. Past times map to
    /// the anchor, which is already elapsed.
    pub fn instant_at(&self, ms: Millis) -> Instant {
        self.anchor + Duration::from_millis(ms.saturating_sub(self.anchor_ms))
    }

    fn system_ms() -> Millis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Millis
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_follows_runtime_time() {
        let clock = Clock::starting_at(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 1_250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_at_matches_now() {
        let clock = Clock::starting_at(500);
        tokio::time::sleep_until(clock.instant_at(1_500)).await;
        assert_eq!(clock.now_ms(), 1_500);

        // already in the past
        assert!(clock.instant_at(0) <= Instant::now());
    }

    #[test]
    fn test_wall_clock_is_after_epoch() {
        assert!(Clock::new().now_ms() > 0);
    }
}
