//! Minimum inter-frame pacing.
//!
//! Frames are never queued: a start request that arrives before the minimum
//! duration has elapsed is simply declined and the caller counts a drop.

use embassy_time::{Duration, Instant};

/// Tracks when the last frame started.
#[derive(Debug, Clone, Copy)]
pub struct FrameTimer {
    min_duration: Duration,
    last_start: Option<Instant>,
}

impl FrameTimer {
    pub const fn new(min_duration: Duration) -> Self {
        Self {
            min_duration,
            last_start: None,
        }
    }

    pub const fn min_duration(&self) -> Duration {
        self.min_duration
    }

    pub fn set_min_duration(&mut self, min_duration: Duration) {
        self.min_duration = min_duration;
    }

    /// Whether a new frame may start at `now`.
    pub fn can_start(&self, now: Instant) -> bool {
        match self.last_start {
            None => true,
            Some(start) => now.saturating_duration_since(start) >= self.min_duration,
        }
    }

    pub fn mark_start(&mut self, now: Instant) {
        self.last_start = Some(now);
    }

    pub const fn last_start(&self) -> Option<Instant> {
        self.last_start
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(Duration::from_millis(0))
    }
}

/// Time to shift `bits` out at `bit_period_ns`, plus an idle tail.
pub const fn transmission_time(bits: u64, bit_period_ns: u64, idle_us: u64) -> Duration {
    Duration::from_micros((bits * bit_period_ns).div_ceil(1000) + idle_us)
}
