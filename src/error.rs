//! Engine error taxonomy.
//!
//! Every initialization failure is surfaced once through
//! [`PlayerEvent::Error`](crate::events::PlayerEvent) and leaves the engine
//! uninitialized; tearing down and reinitializing is the only recovery path.
//! Mid-playback decode errors on single packets are logged and skipped and
//! never appear here.

use crate::session::MediaKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlayerError {
    /// The demuxer could not be set up over the media buffer.
    #[error("cannot open a demuxer over the media buffer: {0}")]
    SourceAllocationFailed(String),

    /// The container holds no stream of the requested kind.
    #[error("no {0} stream found in the media buffer")]
    NoSuchStream(MediaKind),

    /// No decoder is available for the stream's codec.
    #[error("no decoder available for the {0} codec")]
    UnsupportedCodec(MediaKind),

    /// The decoder exists but could not be opened.
    #[error("cannot open {kind} decoder: {reason}")]
    DecoderOpenFailed { kind: MediaKind, reason: String },

    /// The audio resampler could not be built.
    #[error("cannot initialize audio resampler: {0}")]
    ResamplerInitFailed(String),

    /// The pixel-format converter could not be built.
    #[error("cannot initialize pixel converter: {0}")]
    ConverterInitFailed(String),

    /// The audio output device could not be opened.
    #[error("cannot open audio output device: {0}")]
    DeviceOpenFailed(String),

    /// The demuxer rejected a seek target.
    #[error("invalid seek target: {0}")]
    InvalidSeek(String),
}
