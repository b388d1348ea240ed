//! Playback engines: control surface plus a dedicated decode thread each.
//!
//! The caller thread only uses the control API and the event channel; the
//! decode thread owns the session and the sink outright and is driven by
//! control messages. While paused it blocks on the command receiver, so
//! every control message doubles as a wakeup. Observable state (`paused`,
//! `reached_end`, position) is published through atomics rather than a
//! mutex over flags.

pub mod audio;
mod state;
pub mod sync;
pub mod video;

pub use state::EngineState;

use crate::config::PlayerConfig;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Control messages consumed by a decode thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Command {
    /// Toggle between playing and paused.
    TogglePause,
    /// Reposition to the given time in seconds (already clamped).
    Seek(f64),
    /// Rewind to the start and clear the end-of-stream latch.
    Reset,
    /// Leave the decode loop without emitting further events.
    Stop,
}

/// State a decode thread publishes for the control API.
///
/// The position is stored as whole microseconds so it can be read from any
/// thread without a lock.
pub(crate) struct EngineShared {
    paused: AtomicBool,
    reached_end: AtomicBool,
    position_us: AtomicI64,
}

impl EngineShared {
    /// Engines start paused; the first pause toggle begins playback.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            paused: AtomicBool::new(true),
            reached_end: AtomicBool::new(false),
            position_us: AtomicI64::new(0),
        })
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn reached_end(&self) -> bool {
        self.reached_end.load(Ordering::Acquire)
    }

    pub fn set_reached_end(&self, reached: bool) {
        self.reached_end.store(reached, Ordering::Release);
    }

    /// Playback position in seconds.
    pub fn position(&self) -> f64 {
        self.position_us.load(Ordering::Acquire) as f64 / 1_000_000.0
    }

    pub fn set_position(&self, secs: f64) {
        self.position_us
            .store((secs * 1_000_000.0) as i64, Ordering::Release);
    }
}

/// Rate limiter for position events: emit when the interval elapsed OR the
/// position moved by more than the configured delta, never per frame.
pub(crate) struct PositionThrottle {
    interval: Duration,
    delta: f64,
    last_emitted: f64,
    last_instant: Instant,
}

impl PositionThrottle {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            interval: config.position_interval,
            delta: config.position_delta,
            last_emitted: 0.0,
            last_instant: Instant::now(),
        }
    }

    /// Whether a position event should go out now; updates the bookkeeping
    /// when it answers yes.
    pub fn should_emit(&mut self, position: f64) -> bool {
        if (position - self.last_emitted).abs() > self.delta
            || self.last_instant.elapsed() >= self.interval
        {
            self.mark(position);
            true
        } else {
            false
        }
    }

    /// Record an emission that bypassed the throttle (seeks report
    /// immediately).
    pub fn mark(&mut self, position: f64) {
        self.last_emitted = position;
        self.last_instant = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_defaults() {
        let shared = EngineShared::new();
        assert!(shared.is_paused());
        assert!(!shared.reached_end());
        assert_eq!(shared.position(), 0.0);
    }

    #[test]
    fn test_shared_position_round_trip() {
        let shared = EngineShared::new();
        shared.set_position(12.345678);
        assert!((shared.position() - 12.345678).abs() < 1e-5);
        shared.set_position(0.0);
        assert_eq!(shared.position(), 0.0);
    }

    #[test]
    fn test_throttle_emits_on_large_jump() {
        let config = PlayerConfig::default();
        let mut throttle = PositionThrottle::new(&config);
        throttle.mark(0.0);

        assert!(!throttle.should_emit(0.1));
        // jumps beyond the delta bypass the interval
        assert!(throttle.should_emit(0.5));
        assert!(!throttle.should_emit(0.6));
    }

    #[test]
    fn test_throttle_emits_after_interval() {
        let config = PlayerConfig {
            position_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let mut throttle = PositionThrottle::new(&config);
        throttle.mark(0.0);

        assert!(!throttle.should_emit(0.01));
        std::thread::sleep(Duration::from_millis(15));
        assert!(throttle.should_emit(0.02));
    }
}
