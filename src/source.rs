//! Seekable pull-based reader over an in-memory media buffer.
//!
//! The demux layer consumes media through `Read + Seek`; [`ByteSource`]
//! implements both over a shared immutable buffer with nothing beyond
//! memory copies. Reading past the end reports end of stream (a zero-length
//! read), never an error.

use bytes::Bytes;
use std::io::{self, Read, Seek, SeekFrom};

/// Immutable media bytes shared between engines.
///
/// Cloning is cheap (reference counted); a video engine hands a clone of the
/// same buffer to its embedded audio engine so both streams demux the same
/// data independently.
pub type SourceBuffer = Bytes;

/// Cursor over a [`SourceBuffer`].
///
/// Each session owns its own `ByteSource`; the cursor starts at zero and is
/// rebuilt (not rewound in place) on reinitialization.
pub struct ByteSource {
    data: SourceBuffer,
    position: u64,
}

impl ByteSource {
    pub fn new(data: SourceBuffer) -> Self {
        Self { data, position: 0 }
    }

    /// Total buffer length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.data.len() as u64;
        if self.position >= len {
            // end of buffer: report EOF, not an error
            return Ok(0);
        }
        let start = self.position as usize;
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for ByteSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.data.len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(delta) => len + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of buffer",
            ));
        }
        // Seeking past the end is allowed; subsequent reads report EOF.
        self.position = target as u64;
        Ok(self.position)
    }
}
