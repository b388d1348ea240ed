//! Demux/decode sessions over the in-memory byte source.
//!
//! A session wires one [`ByteSource`](crate::source::ByteSource) into the
//! FFmpeg demuxer, selects the first stream of the wanted kind and exposes a
//! pull API for decoded output. Sessions are destroyed and recreated
//! wholesale on reinitialization so no inconsistent codec state survives an
//! error, and a seek rebuilds the codec chain to flush its internal buffers.

mod audio;
mod video;

pub use audio::{AudioSession, PcmChunk};
pub use video::VideoSession;

use ac_ffmpeg::time::Timestamp;

/// Kind of media stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Decoded video frame in packed interleaved RGB24 layout, stride-free.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// `width * height * 3` bytes, rows top to bottom.
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    /// Presentation time in seconds, when the container provided one.
    pub pts: Option<f64>,
}

/// Convert a stream timestamp to seconds.
pub(crate) fn ts_to_secs(ts: Timestamp) -> Option<f64> {
    ts.as_micros().map(|micros| micros as f64 / 1_000_000.0)
}

/// Convert seconds to a timestamp in the microsecond time base.
pub(crate) fn secs_to_ts(secs: f64) -> Timestamp {
    Timestamp::from_micros((secs * 1_000_000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_ffmpeg::time::Timestamp;

    #[test]
    fn test_timestamp_seconds_round_trip() {
        let ts = secs_to_ts(12.5);
        assert_eq!(ts_to_secs(ts), Some(12.5));
    }

    #[test]
    fn test_null_timestamp_has_no_seconds() {
        assert_eq!(ts_to_secs(Timestamp::null()), None);
    }
}
