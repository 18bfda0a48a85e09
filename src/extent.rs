//! Extent accumulation: merging runs of changed blocks into single writes.
//!
//! Changed blocks are copied into an extent-owned buffer as they arrive, so a
//! pending extent never depends on the lifetime of a cache buffer.

use tracing::debug;

use crate::device::BlockDevice;
use crate::error::{DevsyncError, Result};

/// A contiguous run of blocks written by one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// First block index of the run.
    pub start: u64,
    /// Number of blocks in the run.
    pub len: u64,
}

impl Extent {
    /// Byte offset of the run for the given block size.
    #[must_use]
    pub const fn byte_offset(&self, block_size: usize) -> u64 {
        self.start * block_size as u64
    }
}

/// Collects changed blocks and flushes each contiguous run as one write.
#[derive(Debug)]
pub struct ExtentAccumulator {
    block_size: usize,
    start: u64,
    len: u64,
    buffer: Vec<u8>,
    bytes_appended: u64,
    write_calls: u64,
}

impl ExtentAccumulator {
    /// Create an accumulator for blocks of `block_size` bytes.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            start: 0,
            len: 0,
            buffer: Vec::new(),
            bytes_appended: 0,
            write_calls: 0,
        }
    }

    /// The pending extent, if any.
    #[must_use]
    pub const fn pending(&self) -> Option<Extent> {
        if self.len == 0 {
            None
        } else {
            Some(Extent {
                start: self.start,
                len: self.len,
            })
        }
    }

    /// Total bytes appended, whether or not flushed yet.
    #[must_use]
    pub const fn bytes_appended(&self) -> u64 {
        self.bytes_appended
    }

    /// Number of write calls issued to the device.
    #[must_use]
    pub const fn write_calls(&self) -> u64 {
        self.write_calls
    }

    /// Queue block `block_index` with contents `data` for writing.
    ///
    /// Extends the pending extent when `block_index` directly follows it;
    /// otherwise flushes the pending extent to `device` and starts a new one.
    ///
    /// # Errors
    ///
    /// Propagates errors from the flush.
    ///
    /// # Panics
    ///
    /// Panics if `data` is not exactly one block long.
    pub fn append<D: BlockDevice + ?Sized>(
        &mut self,
        device: &D,
        block_index: u64,
        data: &[u8],
    ) -> Result<()> {
        assert_eq!(data.len(), self.block_size, "append takes exactly one block");

        if self.len == 0 || block_index != self.start + self.len {
            self.flush(device)?;
            self.start = block_index;
        }
        self.buffer.extend_from_slice(data);
        self.len += 1;
        self.bytes_appended += self.block_size as u64;
        Ok(())
    }

    /// Write the pending extent, if any, with a single positioned write.
    ///
    /// Returns the extent that was written.
    ///
    /// # Errors
    ///
    /// Returns [`DevsyncError::ShortWrite`] if the device accepts fewer bytes
    /// than requested, or the underlying I/O error.
    pub fn flush<D: BlockDevice + ?Sized>(&mut self, device: &D) -> Result<Option<Extent>> {
        let Some(extent) = self.pending() else {
            return Ok(None);
        };
        let offset = extent.byte_offset(self.block_size);
        debug!(start = extent.start, blocks = extent.len, offset, "flushing extent");

        let written = device.write_at(&self.buffer, offset)?;
        self.write_calls += 1;
        if written != self.buffer.len() {
            return Err(DevsyncError::ShortWrite {
                offset,
                expected: self.buffer.len(),
                written,
            });
        }

        self.len = 0;
        self.buffer.clear();
        Ok(Some(extent))
    }
}
