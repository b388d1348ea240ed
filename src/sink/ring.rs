//! Lock-free sample ring between the decode thread and the device callback.
//!
//! Single producer (decode thread), single consumer (audio device callback).
//! The writer never overtakes the reader; the reader outputs silence when
//! the ring runs dry. One slot is sacrificed to distinguish full from empty.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct SampleRing {
    buffer: Vec<f32>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    capacity: usize,
}

// Safety: the only interior mutation happens through the raw pointer in
// `write`, and the write/read index protocol guarantees the regions touched
// by the single producer and the single consumer never overlap.
unsafe impl Send for SampleRing {}
unsafe impl Sync for SampleRing {}

impl SampleRing {
    /// Create a ring holding `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity],
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Append samples; returns how many were accepted. Excess samples are
    /// left with the caller (the producer applies backpressure, the ring
    /// never drops queued audio).
    pub fn write(&self, samples: &[f32]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        let to_write = samples.len().min(free_between(write, read, self.capacity));
        if to_write == 0 {
            return 0;
        }

        // Safety: see the Send/Sync note above; `write..write+to_write`
        // (mod capacity) is owned by the producer until write_pos is bumped.
        let buf = self.buffer.as_ptr() as *mut f32;
        for (offset, &sample) in samples[..to_write].iter().enumerate() {
            unsafe {
                *buf.add((write + offset) % self.capacity) = sample;
            }
        }

        self.write_pos
            .store((write + to_write) % self.capacity, Ordering::Release);
        to_write
    }

    /// Fill `output` from the ring, padding with silence on underrun.
    /// Returns the number of real samples copied.
    pub fn read(&self, output: &mut [f32]) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);

        let available = used_between(write, read, self.capacity);
        let to_read = output.len().min(available);

        for (offset, sample) in output[..to_read].iter_mut().enumerate() {
            *sample = self.buffer[(read + offset) % self.capacity];
        }
        for sample in output[to_read..].iter_mut() {
            *sample = 0.0;
        }

        if to_read > 0 {
            self.read_pos
                .store((read + to_read) % self.capacity, Ordering::Release);
        }
        to_read
    }

    /// Samples currently queued.
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Relaxed);
        used_between(write, read, self.capacity)
    }

    /// Samples that can be written right now.
    pub fn free(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Relaxed);
        free_between(write, read, self.capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all queued samples.
    pub fn reset(&self) {
        self.read_pos.store(0, Ordering::Release);
        self.write_pos.store(0, Ordering::Release);
    }
}

fn used_between(write: usize, read: usize, capacity: usize) -> usize {
    if write >= read {
        write - read
    } else {
        capacity - read + write
    }
}

fn free_between(write: usize, read: usize, capacity: usize) -> usize {
    capacity - used_between(write, read, capacity) - 1
}
