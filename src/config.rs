//! Tunable playback parameters.

use crate::engine::sync::SyncConfig;
use crate::sink::PcmFormat;
use std::time::Duration;

/// Configuration shared by both engines.
///
/// The defaults reproduce the behavior the engine was tuned with; none of
/// these values is a hard physical constant.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Fixed PCM format produced by the resampler and consumed by the sink.
    pub output_format: PcmFormat,

    /// Playback sink buffering, in seconds of output-format audio.
    pub sink_buffer_secs: f64,

    /// The decode thread stops writing while the sink's free space is below
    /// this fraction of its capacity.
    pub backpressure_free_ratio: f64,

    /// How often a backpressure wait re-checks free space and control
    /// messages.
    pub backpressure_poll: Duration,

    /// Minimum interval between position events.
    pub position_interval: Duration,

    /// Position change (seconds) that forces an event before the interval
    /// elapses.
    pub position_delta: f64,

    /// Video pacing parameters.
    pub sync: SyncConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            output_format: PcmFormat::default(),
            sink_buffer_secs: 0.5,
            backpressure_free_ratio: 0.25,
            backpressure_poll: Duration::from_millis(10),
            position_interval: Duration::from_millis(250),
            position_delta: 0.25,
            sync: SyncConfig::default(),
        }
    }
}
