//! A/V synchronization and frame pacing.
//!
//! Audio is the reference clock: it plays at a constant sample-rate-driven
//! pace and glitches there are far more audible than a dropped video frame.
//! [`Synchronizer`] decides per frame whether to display, wait or drop by
//! comparing the frame's PTS against the audio position. Streams without an
//! audio reference are paced by [`FramePacer`] on a wall-clock schedule
//! derived from consecutive PTS values.

use std::time::{Duration, Instant};

/// Tunable pacing parameters.
///
/// The thresholds trade drift tolerance against perceived jitter; the
/// defaults are the values the engine was tuned with, not physical
/// constants.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Video leading audio by more than this waits before display.
    pub ahead_threshold: Duration,

    /// Video trailing audio by more than this drops the frame instead of
    /// trying to catch up.
    pub behind_threshold: Duration,

    /// Upper bound for any single pacing sleep.
    pub max_wait: Duration,

    /// Frame rate assumed when the container does not provide one.
    pub fallback_fps: f64,

    /// PTS deltas above this are implausible (stream discontinuity) and are
    /// replaced by the nominal frame interval.
    pub max_frame_delta: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ahead_threshold: Duration::from_millis(50),
            behind_threshold: Duration::from_millis(100),
            max_wait: Duration::from_millis(100),
            fallback_fps: 30.0,
            max_frame_delta: Duration::from_millis(1000),
        }
    }
}

/// Scheduling decision for one decoded video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Display immediately.
    Emit,
    /// Sleep this long, then display.
    Wait(Duration),
    /// Discard without displaying and move on to the next frame.
    Drop,
}

/// Pure decision logic comparing a frame's PTS against the audio clock.
///
/// No I/O, no clock access; the decode loop owns the sleeping.
pub struct Synchronizer {
    config: SyncConfig,
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Decide how to schedule a frame with presentation time `video_pts`
    /// (seconds) against the audio playback position `audio_pos` (seconds).
    pub fn decide(&self, video_pts: f64, audio_pos: f64) -> SyncDecision {
        let diff = video_pts - audio_pos;
        let ahead = self.config.ahead_threshold.as_secs_f64();

        if diff > ahead {
            // aim slightly short of the threshold so the next frame lands
            // inside the emit window
            let wait = (diff - ahead / 2.0).min(self.config.max_wait.as_secs_f64());
            SyncDecision::Wait(Duration::from_secs_f64(wait.max(0.0)))
        } else if diff < -self.config.behind_threshold.as_secs_f64() {
            SyncDecision::Drop
        } else {
            SyncDecision::Emit
        }
    }
}

/// Wall-clock frame pacing for streams without an audio reference.
///
/// The delay before a frame is the PTS gap to its predecessor minus the time
/// already spent since that frame was emitted, clamped at zero. Missing or
/// implausible PTS gaps fall back to the nominal frame interval.
pub struct FramePacer {
    nominal: Duration,
    max_frame_delta: Duration,
    last_pts: Option<f64>,
    last_frame: Option<Instant>,
}

impl FramePacer {
    pub fn new(frame_rate: f64, config: &SyncConfig) -> Self {
        let fps = if frame_rate > 0.0 {
            frame_rate
        } else {
            config.fallback_fps
        };
        Self {
            nominal: Duration::from_secs_f64(1.0 / fps),
            max_frame_delta: config.max_frame_delta,
            last_pts: None,
            last_frame: None,
        }
    }

    /// Delay to apply before emitting a frame with the given PTS. The first
    /// frame after construction or a rewind is never delayed.
    pub fn delay_for(&mut self, pts: Option<f64>) -> Duration {
        let Some(last_frame) = self.last_frame else {
            return Duration::ZERO;
        };

        let interval = match (self.last_pts, pts) {
            (Some(last_pts), Some(pts)) => {
                let delta = pts - last_pts;
                if delta <= 0.0 || delta > self.max_frame_delta.as_secs_f64() {
                    self.nominal
                } else {
                    Duration::from_secs_f64(delta)
                }
            }
            _ => self.nominal,
        };

        interval.saturating_sub(last_frame.elapsed())
    }

    /// Record that a frame was emitted now.
    pub fn frame_emitted(&mut self, pts: Option<f64>) {
        self.last_frame = Some(Instant::now());
        if pts.is_some() {
            self.last_pts = pts;
        }
    }

    /// Forget pacing history (after a seek).
    pub fn rewind(&mut self) {
        self.last_pts = None;
        self.last_frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync() -> Synchronizer {
        Synchronizer::new(SyncConfig::default())
    }

    fn wait_duration(decision: SyncDecision) -> Duration {
        match decision {
            SyncDecision::Wait(d) => d,
            other => panic!("expected Wait, got {other:?}"),
        }
    }

    #[test]
    fn test_in_window_emits_immediately() {
        let sync = sync();
        assert_eq!(sync.decide(1.0, 1.0), SyncDecision::Emit);
        assert_eq!(sync.decide(1.04, 1.0), SyncDecision::Emit);
        assert_eq!(sync.decide(0.92, 1.0), SyncDecision::Emit);
    }

    #[test]
    fn test_video_ahead_waits_half_threshold_short() {
        let sync = sync();
        // 60ms ahead -> wait 60 - 25 = 35ms
        let wait = wait_duration(sync.decide(1.06, 1.0));
        assert!((wait.as_secs_f64() - 0.035).abs() < 0.001, "wait {wait:?}");
    }

    #[test]
    fn test_wait_is_capped() {
        let sync = sync();
        // far ahead: the wait never exceeds the cap
        assert_eq!(
            wait_duration(sync.decide(5.0, 1.0)),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_video_far_behind_drops() {
        let sync = sync();
        assert_eq!(sync.decide(0.85, 1.0), SyncDecision::Drop);
        // exactly at the boundary still emits
        assert_eq!(sync.decide(0.9, 1.0), SyncDecision::Emit);
    }

    #[test]
    fn test_custom_thresholds_are_honored() {
        let sync = Synchronizer::new(SyncConfig {
            ahead_threshold: Duration::from_millis(10),
            behind_threshold: Duration::from_millis(20),
            max_wait: Duration::from_millis(40),
            ..Default::default()
        });
        assert!(matches!(sync.decide(1.015, 1.0), SyncDecision::Wait(_)));
        assert_eq!(sync.decide(0.975, 1.0), SyncDecision::Drop);
        assert_eq!(
            wait_duration(sync.decide(2.0, 1.0)),
            Duration::from_millis(40)
        );
    }

    #[test]
    fn test_pacer_first_frame_is_immediate() {
        let mut pacer = FramePacer::new(30.0, &SyncConfig::default());
        assert_eq!(pacer.delay_for(Some(0.0)), Duration::ZERO);
    }

    #[test]
    fn test_pacer_uses_pts_delta() {
        let mut pacer = FramePacer::new(30.0, &SyncConfig::default());
        pacer.frame_emitted(Some(0.0));

        let delay = pacer.delay_for(Some(0.1));
        // ~100ms minus the few microseconds since frame_emitted
        assert!(delay > Duration::from_millis(90), "delay {delay:?}");
        assert!(delay <= Duration::from_millis(100));
    }

    #[test]
    fn test_pacer_falls_back_on_bad_deltas() {
        let mut pacer = FramePacer::new(25.0, &SyncConfig::default());
        pacer.frame_emitted(Some(10.0));

        // non-increasing PTS -> nominal 40ms interval
        let delay = pacer.delay_for(Some(10.0));
        assert!(delay > Duration::from_millis(30), "delay {delay:?}");
        assert!(delay <= Duration::from_millis(40));

        // implausible jump -> nominal interval as well
        let delay = pacer.delay_for(Some(99.0));
        assert!(delay <= Duration::from_millis(40));
    }

    #[test]
    fn test_pacer_rewind_clears_history() {
        let mut pacer = FramePacer::new(30.0, &SyncConfig::default());
        pacer.frame_emitted(Some(5.0));
        pacer.rewind();
        assert_eq!(pacer.delay_for(Some(0.0)), Duration::ZERO);
    }

    #[test]
    fn test_pacer_missing_pts_uses_nominal() {
        let mut pacer = FramePacer::new(50.0, &SyncConfig::default());
        pacer.frame_emitted(None);
        let delay = pacer.delay_for(None);
        assert!(delay <= Duration::from_millis(20));
        assert!(delay > Duration::from_millis(10), "delay {delay:?}");
    }
}
