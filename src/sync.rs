//! Core block-level synchronization engine.
//!
//! `BlockSync` walks source and destination block by block, compares each
//! pair, and hands changed source blocks to an [`ExtentAccumulator`] which
//! writes each contiguous run to the destination in one call.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::info;

use crate::cache::SuperblockCache;
use crate::device::{open_destination, open_source, BlockDevice};
use crate::error::{DevsyncError, Result, Side};
use crate::extent::ExtentAccumulator;
use crate::progress::Progress;

/// Default block size: the unit of comparison and of write decisions.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default super-block size: the unit of bulk reads.
pub const DEFAULT_SUPERBLOCK_SIZE: usize = 1 << 20;

/// Largest accepted super-block size; each side holds one in memory.
pub const MAX_SUPERBLOCK_SIZE: usize = 64 << 20;

/// Receives progress updates during a run.
pub trait SyncObserver {
    /// Called at most once per configured progress interval.
    fn on_progress(&mut self, progress: &Progress);
}

/// Observer that discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl SyncObserver for NoProgress {
    fn on_progress(&mut self, _progress: &Progress) {}
}

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Comparison granularity in bytes (power of 2, 512-65536).
    pub block_size: usize,
    /// Bulk read granularity in bytes (power of 2 multiple of `block_size`,
    /// at most [`MAX_SUPERBLOCK_SIZE`]).
    pub superblock_size: usize,
    /// Minimum time between progress reports.
    pub progress_interval: Duration,
}

impl SyncConfig {
    /// Check block and super-block sizes.
    ///
    /// # Errors
    ///
    /// Returns [`DevsyncError::InvalidBlockSize`] or
    /// [`DevsyncError::InvalidSuperblockSize`].
    pub fn validate(&self) -> Result<()> {
        let bs = self.block_size;
        if !bs.is_power_of_two() || !(512..=65536).contains(&bs) {
            return Err(DevsyncError::InvalidBlockSize(bs));
        }
        let sb = self.superblock_size;
        if !sb.is_power_of_two() || sb < bs || sb > MAX_SUPERBLOCK_SIZE {
            return Err(DevsyncError::InvalidSuperblockSize {
                size: sb,
                block_size: bs,
            });
        }
        Ok(())
    }

    /// Blocks per super-block.
    #[must_use]
    pub const fn blocks_per_superblock(&self) -> usize {
        self.superblock_size / self.block_size
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            superblock_size: DEFAULT_SUPERBLOCK_SIZE,
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// Builder for [`SyncConfig`].
///
/// # Example
///
/// ```rust
/// use devsync::SyncBuilder;
///
/// let config = SyncBuilder::new()
///     .block_size(4096)
///     .superblock_size(4 << 20)
///     .build();
/// assert_eq!(config.blocks_per_superblock(), 1024);
/// ```
#[derive(Debug, Clone)]
pub struct SyncBuilder {
    config: SyncConfig,
}

impl SyncBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    /// Set the block size.
    #[must_use]
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the super-block size.
    #[must_use]
    pub fn superblock_size(mut self, size: usize) -> Self {
        self.config.superblock_size = size;
        self
    }

    /// Set the minimum time between progress reports.
    #[must_use]
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.config.progress_interval = interval;
        self
    }

    /// Build the configuration, validating sizes.
    ///
    /// # Errors
    ///
    /// Returns the validation error from [`SyncConfig::validate`].
    pub fn try_build(self) -> Result<SyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration.
    ///
    /// # Panics
    ///
    /// Panics if the block or super-block size is invalid.
    #[must_use]
    pub fn build(self) -> SyncConfig {
        match self.try_build() {
            Ok(config) => config,
            Err(e) => panic!("{e}"),
        }
    }
}

impl Default for SyncBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics from a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Blocks compared.
    pub blocks_read: u64,
    /// Bytes compared.
    pub bytes_read: u64,
    /// Bytes of changed blocks written.
    pub bytes_written: u64,
    /// Write calls issued to the destination.
    pub write_calls: u64,
    /// Side that ran out of blocks first.
    pub ended: Side,
}

impl SyncStats {
    /// Final report line, e.g. `Finished: End of source after 10MB.  Wrote 1MB.`
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Finished: End of {} after {}MB.  Wrote {}MB.",
            self.ended,
            self.bytes_read >> 20,
            self.bytes_written >> 20
        )
    }
}

/// Block-level diff engine between a source and a destination device.
#[derive(Debug)]
pub struct BlockSync<S, D> {
    source: S,
    destination: D,
    config: SyncConfig,
    source_cache: SuperblockCache,
    destination_cache: SuperblockCache,
    extents: ExtentAccumulator,
}

impl<S: BlockDevice, D: BlockDevice> BlockSync<S, D> {
    /// Create an engine over `source` and `destination`.
    ///
    /// # Errors
    ///
    /// Returns the validation error from [`SyncConfig::validate`].
    pub fn new(source: S, destination: D, config: SyncConfig) -> Result<Self> {
        Ok(Self {
            source_cache: SuperblockCache::new(Side::Source, &config)?,
            destination_cache: SuperblockCache::new(Side::Destination, &config)?,
            extents: ExtentAccumulator::new(config.block_size),
            source,
            destination,
            config,
        })
    }

    /// Compare every block until either side ends, writing changed runs to
    /// the destination.
    ///
    /// # Errors
    ///
    /// Any read, alignment or write failure aborts the run.
    pub fn run<O: SyncObserver + ?Sized>(mut self, observer: &mut O) -> Result<SyncStats> {
        let block_size = self.config.block_size as u64;
        let mut n = 0u64;
        let mut last_report: Option<Instant> = None;

        let ended = loop {
            // The pending extent must reach the destination before the source
            // moves on to the next super-block.
            if !self.source_cache.is_resident(n) {
                self.extents.flush(&self.destination)?;
            }

            let Some(src) = self.source_cache.block_data(&self.source, n)? else {
                break Side::Source;
            };
            let Some(dst) = self.destination_cache.block_data(&self.destination, n)? else {
                break Side::Destination;
            };

            if src != dst {
                self.extents.append(&self.destination, n, src)?;
            }
            n += 1;

            if last_report.map_or(true, |t| t.elapsed() >= self.config.progress_interval) {
                last_report = Some(Instant::now());
                observer.on_progress(&Progress {
                    bytes_read: n * block_size,
                    bytes_written: self.extents.bytes_appended(),
                });
            }
        };

        self.extents.flush(&self.destination)?;

        let stats = SyncStats {
            blocks_read: n,
            bytes_read: n * block_size,
            bytes_written: self.extents.bytes_appended(),
            write_calls: self.extents.write_calls(),
            ended,
        };
        info!(
            blocks_read = stats.blocks_read,
            bytes_written = stats.bytes_written,
            write_calls = stats.write_calls,
            source_loads = self.source_cache.loads(),
            destination_loads = self.destination_cache.loads(),
            ended = %stats.ended,
            "sync finished"
        );
        Ok(stats)
    }
}

/// Open `source` read-only and `destination` read-write, then run a sync.
///
/// # Errors
///
/// Returns [`DevsyncError::Open`] if either path fails to open, or any error
/// from [`BlockSync::run`].
pub fn sync_paths<P, Q, O>(
    source: P,
    destination: Q,
    config: SyncConfig,
    observer: &mut O,
) -> Result<SyncStats>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    O: SyncObserver + ?Sized,
{
    let source = open_source(source)?;
    let destination = open_destination(destination)?;
    BlockSync::new(source, destination, config)?.run(observer)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::device::MemoryDevice;
    use proptest::prelude::*;

    const BS: usize = 512;
    const PER_SB: usize = 4;

    fn config() -> SyncConfig {
        SyncBuilder::new()
            .block_size(BS)
            .superblock_size(BS * PER_SB)
            .build()
    }

    fn expand(tags: &[u8]) -> Vec<u8> {
        tags.iter()
            .flat_map(|&b| std::iter::repeat(b).take(BS))
            .collect()
    }

    proptest! {
        /// After a run the compared prefix of the destination matches the source.
        #[test]
        fn destination_matches_source_prefix(
            src in prop::collection::vec(0u8..3, 0..24),
            dst in prop::collection::vec(0u8..3, 0..24)
        ) {
            let source = MemoryDevice::new(expand(&src));
            let destination = MemoryDevice::new(expand(&dst));

            let stats = BlockSync::new(&source, &destination, config())
                .unwrap()
                .run(&mut NoProgress)
                .unwrap();

            let common = src.len().min(dst.len());
            prop_assert_eq!(stats.blocks_read, common as u64);
            let out = destination.contents();
            let src_bytes = expand(&src);
            let dst_bytes = expand(&dst);
            prop_assert_eq!(&out[..common * BS], &src_bytes[..common * BS]);
            prop_assert_eq!(&out[common * BS..], &dst_bytes[common * BS..]);
        }

        /// Writes cover only differing blocks, one call per run within a super-block.
        #[test]
        fn writes_cover_exactly_differing_runs(
            pairs in prop::collection::vec((0u8..2, 0u8..2), 0..24)
        ) {
            let src: Vec<u8> = pairs.iter().map(|p| p.0).collect();
            let dst: Vec<u8> = pairs.iter().map(|p| p.1).collect();
            let source = MemoryDevice::new(expand(&src));
            let destination = MemoryDevice::new(expand(&dst));

            BlockSync::new(&source, &destination, config())
                .unwrap()
                .run(&mut NoProgress)
                .unwrap();

            let mut expected = Vec::new();
            let mut i = 0;
            while i < pairs.len() {
                if src[i] == dst[i] {
                    i += 1;
                    continue;
                }
                let start = i;
                i += 1;
                while i < pairs.len() && src[i] != dst[i] && i % PER_SB != 0 {
                    i += 1;
                }
                expected.push(((start * BS) as u64, (i - start) * BS));
            }
            prop_assert_eq!(destination.writes(), expected);
        }
    }
}
