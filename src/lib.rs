//! # Devsync
//!
//! Incremental block-level mirroring of a device into a destination file.
//!
//! Devsync compares a read-only source with a destination that already holds
//! an earlier snapshot and rewrites only the blocks that differ, keeping wear
//! and I/O on the destination to a minimum.
//!
//! ## Features
//!
//! - **Super-block reads**: 1 MiB bulk reads on each side, served block by block
//! - **Extent coalescing**: each run of changed blocks becomes one write
//! - **Positioned I/O**: no shared file cursor between source and destination
//! - **Fail fast**: any read, alignment or write error aborts the run
//!
//! ## Example
//!
//! ```rust
//! use devsync::{BlockSync, MemoryDevice, NoProgress, Side, SyncConfig};
//!
//! let source = MemoryDevice::new(vec![7u8; 3 * 4096]);
//! let mut snapshot = vec![7u8; 3 * 4096];
//! snapshot[4096] = 0;
//! let destination = MemoryDevice::new(snapshot);
//!
//! let stats = BlockSync::new(&source, &destination, SyncConfig::default())
//!     .unwrap()
//!     .run(&mut NoProgress)
//!     .unwrap();
//!
//! assert_eq!(stats.bytes_written, 4096);
//! assert_eq!(stats.ended, Side::Source);
//! assert_eq!(destination.contents(), source.contents());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

mod cache;
mod device;
mod error;
mod extent;
mod progress;
mod sync;

pub use cache::SuperblockCache;
pub use device::{open_destination, open_source, read_full_at, BlockDevice, MemoryDevice};
pub use error::{DevsyncError, Result, Side};
pub use extent::{Extent, ExtentAccumulator};
pub use progress::{ConsoleProgress, Progress};
pub use sync::{
    sync_paths, BlockSync, NoProgress, SyncBuilder, SyncConfig, SyncObserver, SyncStats,
    DEFAULT_BLOCK_SIZE, DEFAULT_SUPERBLOCK_SIZE, MAX_SUPERBLOCK_SIZE,
};
