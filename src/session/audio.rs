//! Audio demux/decode/resample session.

use super::{secs_to_ts, ts_to_secs, MediaKind};
use crate::error::PlayerError;
use crate::sink::PcmFormat;
use crate::source::{ByteSource, SourceBuffer};
use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::audio::{AudioDecoder, AudioFrame, AudioResampler, ChannelLayout};
use ac_ffmpeg::codec::{AudioCodecParameters, Decoder};
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo, SeekTarget};
use ac_ffmpeg::format::io::IO;
use log::warn;

/// A run of resampled PCM produced from one compressed packet.
#[derive(Default)]
pub struct PcmChunk {
    /// Interleaved s16-le samples in the session's target format.
    pub data: Vec<u8>,
    /// Presentation time of the first sample, in seconds.
    pub pts: Option<f64>,
}

/// Demuxer, decoder and resampler over the first audio stream of a buffer.
pub struct AudioSession {
    demuxer: DemuxerWithStreamInfo<ByteSource>,
    decoder: AudioDecoder,
    resampler: AudioResampler,
    codec_params: AudioCodecParameters,
    stream_index: usize,
    target: PcmFormat,
    sample_rate: u32,
    channels: u32,
    duration: f64,
    flushed: bool,
}

impl AudioSession {
    /// Open the first audio stream of the buffer and prepare decoding and
    /// resampling towards `target`.
    pub fn open(source: SourceBuffer, target: PcmFormat) -> Result<Self, PlayerError> {
        let io = IO::from_seekable_read_stream(ByteSource::new(source));

        let demuxer = Demuxer::builder()
            .build(io)
            .map_err(|err| PlayerError::SourceAllocationFailed(err.to_string()))?
            .find_stream_info(None)
            .map_err(|(_, err)| PlayerError::SourceAllocationFailed(err.to_string()))?;

        let (stream_index, codec_params, duration) = demuxer
            .streams()
            .iter()
            .enumerate()
            .find_map(|(index, stream)| {
                let duration = ts_to_secs(stream.duration()).unwrap_or(0.0);
                stream
                    .codec_parameters()
                    .into_audio_codec_parameters()
                    .map(|params| (index, params, duration))
            })
            .ok_or(PlayerError::NoSuchStream(MediaKind::Audio))?;

        if codec_params.decoder_name().is_none() {
            return Err(PlayerError::UnsupportedCodec(MediaKind::Audio));
        }

        let decoder = open_decoder(&codec_params)?;
        let resampler = build_resampler(&codec_params, target)?;

        Ok(Self {
            sample_rate: codec_params.sample_rate(),
            channels: codec_params.channel_layout().channels(),
            demuxer,
            decoder,
            resampler,
            codec_params,
            stream_index,
            target,
            duration,
            flushed: false,
        })
    }

    /// Sample rate of the source stream (not the resampled output).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count of the source stream.
    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Stream duration in seconds, 0.0 when the container does not know it.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Decode up to the next run of PCM data.
    ///
    /// Packets that fail to decode are logged and skipped; a failed packet
    /// read is treated as end of stream. `None` means end of stream.
    pub fn next_pcm(&mut self) -> Option<PcmChunk> {
        loop {
            let packet = match self.demuxer.take() {
                Ok(Some(packet)) => packet,
                Ok(None) => return self.flush_remaining(),
                Err(err) => {
                    warn!("packet read failed, treating as end of stream: {err}");
                    return self.flush_remaining();
                }
            };

            if packet.stream_index() != self.stream_index {
                continue;
            }

            let mut chunk = PcmChunk::default();

            match self.decoder.try_push(packet.clone()) {
                Ok(()) => {}
                Err(err) if err.is_again() => {
                    self.drain_decoded(&mut chunk);
                    if let Err(err) = self.decoder.try_push(packet) {
                        warn!("skipping undecodable audio packet: {err}");
                    }
                }
                Err(err) => {
                    warn!("skipping undecodable audio packet: {err}");
                    continue;
                }
            }

            self.drain_decoded(&mut chunk);

            if chunk.data.is_empty() {
                // decoder is still buffering
                continue;
            }

            return Some(chunk);
        }
    }

    /// Reposition the stream to the keyframe at or before `secs` and rebuild
    /// the codec chain so no stale decoder state survives.
    pub fn seek_to(&mut self, secs: f64) -> Result<(), PlayerError> {
        self.demuxer
            .seek_to_timestamp(secs_to_ts(secs), SeekTarget::UpTo)
            .map_err(|err| PlayerError::InvalidSeek(err.to_string()))?;
        self.decoder = open_decoder(&self.codec_params)?;
        self.resampler = build_resampler(&self.codec_params, self.target)?;
        self.flushed = false;
        Ok(())
    }

    fn flush_remaining(&mut self) -> Option<PcmChunk> {
        if self.flushed {
            return None;
        }
        self.flushed = true;
        let _ = self.decoder.try_flush();
        let mut chunk = PcmChunk::default();
        self.drain_decoded(&mut chunk);
        if chunk.data.is_empty() {
            None
        } else {
            Some(chunk)
        }
    }

    fn drain_decoded(&mut self, chunk: &mut PcmChunk) {
        while let Ok(Some(frame)) = self.decoder.take() {
            if chunk.pts.is_none() {
                chunk.pts = ts_to_secs(frame.pts());
            }
            self.resample_into(frame, &mut chunk.data);
        }
    }

    fn resample_into(&mut self, frame: AudioFrame, out: &mut Vec<u8>) {
        if let Err(err) = self.resampler.push(frame) {
            warn!("audio resampler rejected a frame: {err}");
            return;
        }
        while let Ok(Some(converted)) = self.resampler.take() {
            let bytes = converted.samples() * self.target.channels as usize * 2;
            let plane = &converted.planes()[0];
            let data = plane.data();
            out.extend_from_slice(&data[..bytes.min(data.len())]);
        }
    }
}

fn open_decoder(params: &AudioCodecParameters) -> Result<AudioDecoder, PlayerError> {
    AudioDecoder::from_codec_parameters(params)
        .and_then(|builder| builder.build())
        .map_err(|err| PlayerError::DecoderOpenFailed {
            kind: MediaKind::Audio,
            reason: err.to_string(),
        })
}

fn build_resampler(
    params: &AudioCodecParameters,
    target: PcmFormat,
) -> Result<AudioResampler, PlayerError> {
    let target_layout = ChannelLayout::from_channels(target.channels).ok_or_else(|| {
        PlayerError::ResamplerInitFailed(format!(
            "unsupported channel count {}",
            target.channels
        ))
    })?;

    AudioResampler::builder()
        .source_channel_layout(params.channel_layout().to_owned())
        .source_sample_format(params.sample_format())
        .source_sample_rate(params.sample_rate())
        .target_channel_layout(target_layout)
        .target_sample_format(get_sample_format("s16"))
        .target_sample_rate(target.sample_rate)
        .build()
        .map_err(|err| PlayerError::ResamplerInitFailed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_garbage_buffer() {
        let garbage = SourceBuffer::from_static(&[0u8; 64]);
        let result = AudioSession::open(garbage, PcmFormat::default());
        assert!(matches!(
            result,
            Err(PlayerError::SourceAllocationFailed(_)) | Err(PlayerError::NoSuchStream(_))
        ));
    }
}
