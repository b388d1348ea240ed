//! cpal-backed playback sink.

use super::ring::SampleRing;
use super::{AudioSink, PcmFormat, VolumeHandle};
use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::error;
use std::sync::Arc;

const I16_TO_F32: f32 = 1.0 / 32768.0;

/// Default audio output device fed from a lock-free sample ring.
///
/// The device callback drains the ring (silence on underrun) and applies the
/// shared volume; the decode thread writes s16 PCM into the ring through the
/// [`AudioSink`] interface and uses the free-space gauge for backpressure.
pub struct CpalSink {
    ring: Arc<SampleRing>,
    volume: VolumeHandle,
    stream: cpal::Stream,
}

// Safety: the stream handle is only used from the thread currently owning
// the sink; the ring and the volume cell are the only state shared with the
// device callback and both are thread-safe.
unsafe impl Send for CpalSink {}

impl CpalSink {
    /// Open the default output device with a ring holding `buffer_secs` of
    /// `format` audio.
    pub fn open(format: PcmFormat, buffer_secs: f64) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no output audio device"))?;

        let config = cpal::StreamConfig {
            channels: format.channels as u16,
            sample_rate: format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let capacity =
            (format.sample_rate as f64 * format.channels as f64 * buffer_secs).ceil() as usize;
        let ring = Arc::new(SampleRing::new(capacity.max(1024)));
        let volume = VolumeHandle::new(1.0);

        let callback_ring = Arc::clone(&ring);
        let callback_volume = volume.clone();
        let stream = device.build_output_stream(
            &config,
            move |output: &mut [f32], _| {
                callback_ring.read(output);
                let gain = callback_volume.get();
                if (gain - 1.0).abs() > f32::EPSILON {
                    for sample in output.iter_mut() {
                        *sample *= gain;
                    }
                }
            },
            |err| error!("audio output stream error: {err}"),
            None,
        )?;
        stream.play()?;

        Ok(Self {
            ring,
            volume,
            stream,
        })
    }
}

impl AudioSink for CpalSink {
    fn write(&mut self, pcm: &[u8]) -> usize {
        let samples: Vec<f32> = pcm
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 * I16_TO_F32)
            .collect();
        self.ring.write(&samples) * 2
    }

    fn bytes_free(&self) -> usize {
        self.ring.free() * 2
    }

    fn capacity_bytes(&self) -> usize {
        self.ring.capacity() * 2
    }

    fn volume(&self) -> VolumeHandle {
        self.volume.clone()
    }

    fn reset(&mut self) {
        self.ring.reset();
    }

    fn stop(&mut self) {
        if let Err(err) = self.stream.pause() {
            error!("failed to stop audio output stream: {err}");
        }
        self.ring.reset();
    }
}
