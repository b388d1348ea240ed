//! Video demux/decode/pixel-conversion session.

use super::{secs_to_ts, ts_to_secs, MediaKind, VideoFrame};
use crate::error::PlayerError;
use crate::source::{ByteSource, SourceBuffer};
use ac_ffmpeg::codec::video::frame::get_pixel_format;
use ac_ffmpeg::codec::video::scaler::{Algorithm, VideoFrameScaler};
use ac_ffmpeg::codec::video::VideoDecoder;
use ac_ffmpeg::codec::{Decoder, VideoCodecParameters};
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo, SeekTarget};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::packet::Packet;
use log::warn;

/// Demuxer, decoder and RGB24 converter over the first video stream of a
/// buffer.
pub struct VideoSession {
    demuxer: DemuxerWithStreamInfo<ByteSource>,
    decoder: VideoDecoder,
    converter: VideoFrameScaler,
    codec_params: VideoCodecParameters,
    stream_index: usize,
    pending: Option<Packet>,
    width: usize,
    height: usize,
    duration: f64,
    frame_rate: f64,
    has_audio_stream: bool,
    flushed: bool,
}

impl VideoSession {
    /// Open the first video stream of the buffer and prepare decoding and
    /// conversion to packed RGB24.
    pub fn open(source: SourceBuffer, fallback_fps: f64) -> Result<Self, PlayerError> {
        let io = IO::from_seekable_read_stream(ByteSource::new(source));

        let demuxer = Demuxer::builder()
            .build(io)
            .map_err(|err| PlayerError::SourceAllocationFailed(err.to_string()))?
            .find_stream_info(None)
            .map_err(|(_, err)| PlayerError::SourceAllocationFailed(err.to_string()))?;

        let mut video = None;
        let mut has_audio_stream = false;
        for (index, stream) in demuxer.streams().iter().enumerate() {
            let params = stream.codec_parameters();
            if params.is_audio_codec() {
                has_audio_stream = true;
            } else if video.is_none() {
                if let Some(params) = params.into_video_codec_parameters() {
                    let duration = ts_to_secs(stream.duration()).unwrap_or(0.0);
                    let frames = stream.frames().unwrap_or(0);
                    video = Some((index, params, duration, frames));
                }
            }
        }

        let (stream_index, codec_params, duration, frames) =
            video.ok_or(PlayerError::NoSuchStream(MediaKind::Video))?;

        if codec_params.decoder_name().is_none() {
            return Err(PlayerError::UnsupportedCodec(MediaKind::Video));
        }

        let decoder = open_decoder(&codec_params)?;
        let converter = build_converter(&codec_params)?;

        // The container rarely states a frame rate directly; estimate it from
        // the frame count when possible. Pacing itself follows PTS deltas, so
        // this only sets the nominal fallback interval.
        let frame_rate = if duration > 0.0 && frames > 0 {
            frames as f64 / duration
        } else {
            fallback_fps
        };

        Ok(Self {
            width: codec_params.width(),
            height: codec_params.height(),
            demuxer,
            decoder,
            converter,
            codec_params,
            stream_index,
            pending: None,
            duration,
            frame_rate,
            has_audio_stream,
            flushed: false,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Stream duration in seconds, 0.0 when the container does not know it.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Estimated frames per second; falls back to the configured nominal
    /// rate when the container gives no usable figures.
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Whether the container also carries an audio stream.
    pub fn has_audio_stream(&self) -> bool {
        self.has_audio_stream
    }

    /// Decode and convert the next video frame.
    ///
    /// Packets that fail to decode are logged and skipped; a failed packet
    /// read is treated as end of stream. `None` means end of stream.
    pub fn next_frame(&mut self) -> Option<VideoFrame> {
        loop {
            // Drain before pushing more; decoders may queue several frames.
            if let Some(frame) = self.take_converted() {
                return Some(frame);
            }

            let packet = match self.pending.take() {
                Some(packet) => packet,
                None => loop {
                    match self.demuxer.take() {
                        Ok(Some(packet)) if packet.stream_index() == self.stream_index => {
                            break packet;
                        }
                        Ok(Some(_)) => continue,
                        Ok(None) => return self.flush_remaining(),
                        Err(err) => {
                            warn!("packet read failed, treating as end of stream: {err}");
                            return self.flush_remaining();
                        }
                    }
                },
            };

            match self.decoder.try_push(packet.clone()) {
                Ok(()) => {}
                Err(err) if err.is_again() => match self.take_converted() {
                    Some(frame) => {
                        self.pending = Some(packet);
                        return Some(frame);
                    }
                    None => warn!("video decoder stalled, dropping a packet"),
                },
                Err(err) => warn!("skipping undecodable video packet: {err}"),
            }
        }
    }

    /// Reposition the stream to the keyframe at or before `secs` and rebuild
    /// the codec chain so no stale decoder state survives.
    pub fn seek_to(&mut self, secs: f64) -> Result<(), PlayerError> {
        self.demuxer
            .seek_to_timestamp(secs_to_ts(secs), SeekTarget::UpTo)
            .map_err(|err| PlayerError::InvalidSeek(err.to_string()))?;
        self.decoder = open_decoder(&self.codec_params)?;
        self.pending = None;
        self.flushed = false;
        Ok(())
    }

    fn flush_remaining(&mut self) -> Option<VideoFrame> {
        if !self.flushed {
            self.flushed = true;
            let _ = self.decoder.try_flush();
        }
        self.take_converted()
    }

    fn take_converted(&mut self) -> Option<VideoFrame> {
        loop {
            match self.decoder.take() {
                Ok(Some(raw)) => {
                    let pts = ts_to_secs(raw.pts());
                    match self.converter.scale(&raw) {
                        Ok(converted) => {
                            let width = converted.width();
                            let height = converted.height();
                            let mut data = vec![0u8; width * height * 3];
                            let plane = &converted.planes()[0];
                            extract_plane(&mut data, plane.data(), plane.line_size(), width * 3, height);
                            return Some(VideoFrame {
                                data,
                                width,
                                height,
                                pts,
                            });
                        }
                        Err(err) => {
                            warn!("pixel conversion failed, skipping a frame: {err}");
                            continue;
                        }
                    }
                }
                Ok(None) => return None,
                Err(err) => {
                    warn!("video decode error, skipping a frame: {err}");
                    return None;
                }
            }
        }
    }
}

fn open_decoder(params: &VideoCodecParameters) -> Result<VideoDecoder, PlayerError> {
    VideoDecoder::from_codec_parameters(params)
        .and_then(|builder| builder.build())
        .map_err(|err| PlayerError::DecoderOpenFailed {
            kind: MediaKind::Video,
            reason: err.to_string(),
        })
}

fn build_converter(params: &VideoCodecParameters) -> Result<VideoFrameScaler, PlayerError> {
    VideoFrameScaler::builder()
        .source_pixel_format(params.pixel_format())
        .source_width(params.width())
        .source_height(params.height())
        .target_pixel_format(get_pixel_format("rgb24"))
        .target_width(params.width())
        .target_height(params.height())
        .algorithm(Algorithm::Lanczos)
        .build()
        .map_err(|err| PlayerError::ConverterInitFailed(err.to_string()))
}

/// Copy a possibly stride-padded plane into a contiguous destination.
///
/// Fast path when the source has no padding, otherwise row-by-row.
fn extract_plane(dst: &mut [u8], src: &[u8], stride: usize, row_bytes: usize, height: usize) {
    if stride == row_bytes && src.len() >= row_bytes * height {
        dst.copy_from_slice(&src[..row_bytes * height]);
        return;
    }

    for row in 0..height {
        let src_start = row * stride;
        let dst_start = row * row_bytes;
        if src_start + row_bytes > src.len() || dst_start + row_bytes > dst.len() {
            break;
        }
        dst[dst_start..dst_start + row_bytes]
            .copy_from_slice(&src[src_start..src_start + row_bytes]);
    }
}
