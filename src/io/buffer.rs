use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::config::DIRECT_IO_ALIGNMENT;
use crate::{Result, SpeedTestError};

/// Chunk buffer whose first byte sits on a direct-I/O boundary.
///
/// `O_DIRECT` and `FILE_FLAG_NO_BUFFERING` reject buffers that are not
/// sector aligned, and a plain `Vec<u8>` only guarantees byte alignment.
/// The buffer over-allocates by one alignment unit and exposes the aligned
/// window.
pub struct AlignedBuffer {
    storage: Vec<u8>,
    offset: usize,
    len: usize,
}

impl AlignedBuffer {
    /// Allocate a zeroed buffer of `len` bytes
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(SpeedTestError::Config(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let align = DIRECT_IO_ALIGNMENT as usize;
        let storage = vec![0u8; len + align];
        let offset = storage.as_ptr().align_offset(align);
        if offset + len > storage.len() {
            return Err(SpeedTestError::Config(format!(
                "Unable to align a {} byte buffer",
                len
            )));
        }

        Ok(Self {
            storage,
            offset,
            len,
        })
    }

    /// Allocate a buffer filled with pseudo-random bytes.
    ///
    /// Random content keeps compressing or deduplicating controllers from
    /// inflating the write figure.
    pub fn random(len: usize) -> Result<Self> {
        let mut buffer = Self::new(len)?;
        SmallRng::from_entropy().fill_bytes(buffer.as_mut_slice());
        Ok(buffer)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.offset..self.offset + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
