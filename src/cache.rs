//! Super-block cache: one resident super-block per side.
//!
//! Reads are issued a whole super-block at a time and blocks are served out
//! of the resident buffer, so the diff loop makes one read call per
//! super-block rather than one per block.

use tracing::debug;

use crate::device::{read_full_at, BlockDevice};
use crate::error::{DevsyncError, Result, Side};
use crate::sync::SyncConfig;

/// Buffers one super-block of a device at a time.
#[derive(Debug)]
pub struct SuperblockCache {
    side: Side,
    block_size: usize,
    block_shift: u32,
    blocks_per_superblock: u64,
    buffer: Vec<u8>,
    /// Index of the resident super-block, if any.
    loaded: Option<u64>,
    /// Whole blocks present in `buffer`; below `blocks_per_superblock` only
    /// for the final super-block of the stream.
    valid_blocks: u64,
    loads: u64,
}

impl SuperblockCache {
    /// Create an empty cache for `side` sized from `config`.
    ///
    /// # Errors
    ///
    /// Returns the validation error from [`SyncConfig::validate`]; block
    /// addressing relies on power-of-two sizes.
    pub fn new(side: Side, config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        let blocks_per_superblock = config.blocks_per_superblock() as u64;
        Ok(Self {
            side,
            block_size: config.block_size,
            block_shift: blocks_per_superblock.trailing_zeros(),
            blocks_per_superblock,
            buffer: vec![0u8; config.superblock_size],
            loaded: None,
            valid_blocks: 0,
            loads: 0,
        })
    }

    /// Super-block index that holds `block_index`.
    #[must_use]
    pub const fn superblock_of(&self, block_index: u64) -> u64 {
        block_index >> self.block_shift
    }

    /// Whether `block_index` lies in the resident super-block.
    #[must_use]
    pub fn is_resident(&self, block_index: u64) -> bool {
        self.loaded == Some(self.superblock_of(block_index))
    }

    /// Number of super-block reads issued so far.
    #[must_use]
    pub const fn loads(&self) -> u64 {
        self.loads
    }

    /// Return the bytes of block `block_index`, loading its super-block if
    /// needed.
    ///
    /// `Ok(None)` is end-of-stream. The returned slice is valid until the
    /// next call that loads a different super-block.
    ///
    /// # Errors
    ///
    /// Returns [`DevsyncError::Misaligned`] if the device yields a partial
    /// block, or the underlying I/O error.
    pub fn block_data<D: BlockDevice + ?Sized>(
        &mut self,
        device: &D,
        block_index: u64,
    ) -> Result<Option<&[u8]>> {
        let superblock = self.superblock_of(block_index);
        let idx = block_index & (self.blocks_per_superblock - 1);

        if self.loaded != Some(superblock) && !self.load(device, superblock)? {
            return Ok(None);
        }
        if idx >= self.valid_blocks {
            return Ok(None);
        }

        #[allow(clippy::cast_possible_truncation)] // idx < blocks_per_superblock
        let start = idx as usize * self.block_size;
        Ok(Some(&self.buffer[start..start + self.block_size]))
    }

    /// Read `superblock` into the buffer. Returns `false` at end-of-stream.
    fn load<D: BlockDevice + ?Sized>(&mut self, device: &D, superblock: u64) -> Result<bool> {
        let offset = superblock * self.buffer.len() as u64;
        // The previous contents are gone whatever the outcome.
        self.loaded = None;
        self.valid_blocks = 0;

        let bytes = read_full_at(device, &mut self.buffer, offset)?;
        self.loads += 1;
        debug!(side = %self.side, superblock, offset, bytes, "loaded super-block");

        if bytes == 0 {
            return Ok(false);
        }
        if bytes % self.block_size != 0 {
            return Err(DevsyncError::Misaligned {
                side: self.side,
                offset,
                bytes,
            });
        }

        self.valid_blocks = (bytes / self.block_size) as u64;
        self.loaded = Some(superblock);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::sync::SyncBuilder;

    fn small_config() -> SyncConfig {
        SyncBuilder::new()
            .block_size(512)
            .superblock_size(2048)
            .build()
    }

    fn patterned(blocks: usize, block_size: usize) -> Vec<u8> {
        (0..blocks)
            .flat_map(|b| std::iter::repeat(b as u8).take(block_size))
            .collect()
    }

    // ==========================================================================
    // ADDRESSING TESTS
    // ==========================================================================

    #[test]
    fn default_geometry() {
        let cache = SuperblockCache::new(Side::Source, &SyncConfig::default()).unwrap();
        assert_eq!(cache.superblock_of(0), 0);
        assert_eq!(cache.superblock_of(255), 0);
        assert_eq!(cache.superblock_of(256), 1);
        assert_eq!(cache.superblock_of(1000), 3);
    }

    #[test]
    fn returns_each_block() {
        let config = small_config();
        let dev = MemoryDevice::new(patterned(10, 512));
        let mut cache = SuperblockCache::new(Side::Source, &config).unwrap();

        for n in 0..10u64 {
            let block = cache.block_data(&dev, n).unwrap().unwrap();
            assert_eq!(block.len(), 512);
            assert!(block.iter().all(|&b| b == n as u8));
        }
    }

    #[test]
    fn rejects_non_power_of_two_superblock() {
        let config = SyncConfig {
            superblock_size: 3 * 4096,
            ..SyncConfig::default()
        };
        let err = SuperblockCache::new(Side::Source, &config).unwrap_err();
        assert!(matches!(err, DevsyncError::InvalidSuperblockSize { .. }));
    }

    // ==========================================================================
    // LOADING TESTS
    // ==========================================================================

    #[test]
    fn one_load_per_superblock() {
        let config = small_config();
        let dev = MemoryDevice::new(patterned(12, 512));
        let mut cache = SuperblockCache::new(Side::Source, &config).unwrap();

        for n in 0..12u64 {
            cache.block_data(&dev, n).unwrap();
        }
        assert_eq!(cache.loads(), 3);
    }

    #[test]
    fn residency_tracks_loaded_superblock() {
        let config = small_config();
        let dev = MemoryDevice::new(patterned(8, 512));
        let mut cache = SuperblockCache::new(Side::Destination, &config).unwrap();

        assert!(!cache.is_resident(0));
        cache.block_data(&dev, 1).unwrap();
        assert!(cache.is_resident(0));
        assert!(cache.is_resident(3));
        assert!(!cache.is_resident(4));
        cache.block_data(&dev, 4).unwrap();
        assert!(!cache.is_resident(0));
        assert!(cache.is_resident(7));
    }

    // ==========================================================================
    // END-OF-STREAM TESTS
    // ==========================================================================

    #[test]
    fn empty_device_is_end_of_stream() {
        let config = small_config();
        let dev = MemoryDevice::new(Vec::new());
        let mut cache = SuperblockCache::new(Side::Source, &config).unwrap();
        assert!(cache.block_data(&dev, 0).unwrap().is_none());
    }

    #[test]
    fn partial_final_superblock() {
        let config = small_config();
        let dev = MemoryDevice::new(patterned(6, 512));
        let mut cache = SuperblockCache::new(Side::Source, &config).unwrap();

        assert!(cache.block_data(&dev, 4).unwrap().is_some());
        assert!(cache.block_data(&dev, 5).unwrap().is_some());
        assert!(cache.block_data(&dev, 6).unwrap().is_none());
        assert_eq!(cache.loads(), 1);
    }

    #[test]
    fn past_end_superblock() {
        let config = small_config();
        let dev = MemoryDevice::new(patterned(4, 512));
        let mut cache = SuperblockCache::new(Side::Source, &config).unwrap();

        assert!(cache.block_data(&dev, 3).unwrap().is_some());
        assert!(cache.block_data(&dev, 4).unwrap().is_none());
        assert!(!cache.is_resident(3));
    }

    // ==========================================================================
    // ALIGNMENT TESTS
    // ==========================================================================

    #[test]
    fn misaligned_source_is_fatal() {
        let config = small_config();
        let dev = MemoryDevice::new(vec![0u8; 512 * 2 + 100]);
        let mut cache = SuperblockCache::new(Side::Source, &config).unwrap();

        let err = cache.block_data(&dev, 0).unwrap_err();
        assert!(matches!(
            err,
            DevsyncError::Misaligned {
                side: Side::Source,
                offset: 0,
                bytes: 1124
            }
        ));
    }

    #[test]
    fn misaligned_tail_detected_on_final_superblock() {
        let config = small_config();
        let dev = MemoryDevice::new(vec![0u8; 2048 + 10]);
        let mut cache = SuperblockCache::new(Side::Destination, &config).unwrap();

        assert!(cache.block_data(&dev, 3).unwrap().is_some());
        let err = cache.block_data(&dev, 4).unwrap_err();
        assert!(matches!(
            err,
            DevsyncError::Misaligned {
                side: Side::Destination,
                offset: 2048,
                bytes: 10
            }
        ));
    }
}
