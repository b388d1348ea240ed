//! Playback sink boundary.
//!
//! The decode thread produces interleaved s16-le PCM; a sink buffers it and
//! feeds the audio device. Free-space accounting drives the decode thread's
//! backpressure wait, and the shared [`VolumeHandle`] lets the control API
//! adjust gain without going through the decode thread.

mod device;
mod ring;

pub use device::CpalSink;
pub use ring::SampleRing;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Fixed PCM output format (s16-le interleaved).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

impl PcmFormat {
    /// Bytes of s16 PCM per second of audio.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * 2
    }
}

/// Shared volume cell, 0.0..=1.0.
///
/// Both the control API and the device callback touch it, so it is stored as
/// f32 bits in an atomic rather than behind a lock.
#[derive(Clone)]
pub struct VolumeHandle(Arc<AtomicU32>);

impl VolumeHandle {
    pub fn new(volume: f32) -> Self {
        Self(Arc::new(AtomicU32::new(volume.clamp(0.0, 1.0).to_bits())))
    }

    pub fn set(&self, volume: f32) {
        self.0
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Audio output device abstraction.
///
/// `write` accepts as much PCM as currently fits and returns the number of
/// bytes taken; the decode thread retries the remainder after its
/// backpressure wait.
pub trait AudioSink: Send {
    /// Queue interleaved s16-le PCM bytes; returns bytes accepted.
    fn write(&mut self, pcm: &[u8]) -> usize;

    /// Free buffer space, in bytes of s16 PCM.
    fn bytes_free(&self) -> usize;

    /// Total buffer capacity, in bytes of s16 PCM.
    fn capacity_bytes(&self) -> usize;

    /// Shared volume cell for this sink.
    fn volume(&self) -> VolumeHandle;

    /// Drop all buffered samples, keeping the device running.
    fn reset(&mut self);

    /// Stop the device and drop buffered samples.
    fn stop(&mut self);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_handle_clamps() {
        let volume = VolumeHandle::new(1.0);
        volume.set(1.7);
        assert_eq!(volume.get(), 1.0);
        volume.set(-0.3);
        assert_eq!(volume.get(), 0.0);
        volume.set(0.42);
        assert!((volume.get() - 0.42).abs() < f32::EPSILON);
    }

    #[test]
    fn test_volume_handle_is_shared() {
        let a = VolumeHandle::new(1.0);
        let b = a.clone();
        a.set(0.25);
        assert_eq!(b.get(), 0.25);
    }

    #[test]
    fn test_pcm_format_byte_rate() {
        let format = PcmFormat::default();
        // 44.1 kHz stereo s16
        assert_eq!(format.bytes_per_second(), 44_100 * 2 * 2);
    }
}
