//! The global frame clock.
//!
//! Frame numbers are the system's only notion of time: 0 at startup,
//! +1 every tick. Conversions to wall time are plain multiplication by
//! the tick period; there is no other clock in the core.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::model::FrameNum;

/// Shared, monotonic frame counter with the tick period attached.
///
/// The event loop owns the only writer; everything else reads.
#[derive(Clone)]
pub struct FrameClock {
    frame: Arc<AtomicU64>,
    period: Duration,
}

impl FrameClock {
    /// Creates a clock at frame 0 with the given tick period.
    pub fn new(period: Duration) -> Self {
        Self {
            frame: Arc::new(AtomicU64::new(0)),
            period,
        }
    }

    /// The frame currently being (or about to be) dispatched.
    pub fn current_frame(&self) -> FrameNum {
        self.frame.load(Ordering::Acquire)
    }

    /// The earliest frame a newly scheduled event can land on.
    pub fn next_frame(&self) -> FrameNum {
        self.current_frame() + 1
    }

    /// Tick period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wall-clock offset of a frame from startup.
    pub fn offset_of(&self, frame: FrameNum) -> Duration {
        Duration::from_nanos((self.period.as_nanos() as u64).saturating_mul(frame))
    }

    /// Number of whole frames covering the given duration, rounded up.
    pub fn frames_in(&self, duration: Duration) -> u64 {
        let period_ns = self.period.as_nanos().max(1);
        (duration.as_nanos().div_ceil(period_ns)) as u64
    }

    /// Advances the counter by one tick. Only the event loop calls this.
    pub(crate) fn advance(&self) -> FrameNum {
        self.frame.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_frame_zero() {
        let clock = FrameClock::new(Duration::from_millis(20));
        assert_eq!(clock.current_frame(), 0);
        assert_eq!(clock.next_frame(), 1);
    }

    #[test]
    fn advance_increments() {
        let clock = FrameClock::new(Duration::from_millis(20));
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(clock.current_frame(), 2);
    }

    #[test]
    fn clones_share_the_counter() {
        let clock = FrameClock::new(Duration::from_millis(20));
        let other = clock.clone();
        clock.advance();
        assert_eq!(other.current_frame(), 1);
    }

    #[test]
    fn offset_is_frame_times_period() {
        let clock = FrameClock::new(Duration::from_millis(20));
        assert_eq!(clock.offset_of(0), Duration::ZERO);
        assert_eq!(clock.offset_of(50), Duration::from_secs(1));
        assert_eq!(clock.offset_of(500), Duration::from_secs(10));
    }

    #[test]
    fn frames_in_rounds_up() {
        let clock = FrameClock::new(Duration::from_millis(20));
        assert_eq!(clock.frames_in(Duration::ZERO), 0);
        assert_eq!(clock.frames_in(Duration::from_millis(1)), 1);
        assert_eq!(clock.frames_in(Duration::from_millis(20)), 1);
        assert_eq!(clock.frames_in(Duration::from_millis(21)), 2);
    }
}
