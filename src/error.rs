//! Error types for devsync operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which side of the synchronization an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The read-only source device or file.
    Source,
    /// The destination file being updated.
    Destination,
}

impl Side {
    /// Lowercase name used in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during devsync operations.
#[derive(Error, Debug)]
pub enum DevsyncError {
    /// I/O error during read/write operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A source or destination path could not be opened.
    #[error("{}: {source}", path.display())]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A read returned a byte count that is not a whole number of blocks.
    #[error("aborted: {side} is not a multiple of the block size ({bytes} bytes read at offset {offset})")]
    Misaligned {
        /// Side the misaligned read came from.
        side: Side,
        /// Byte offset of the super-block read.
        offset: u64,
        /// Bytes actually returned by the read.
        bytes: usize,
    },

    /// A flush wrote fewer bytes than requested.
    #[error("Failed write call to destination: wrote {written} of {expected} bytes at offset {offset}")]
    ShortWrite {
        /// Byte offset of the write.
        offset: u64,
        /// Bytes requested.
        expected: usize,
        /// Bytes the device accepted.
        written: usize,
    },

    /// Invalid block size specified.
    #[error("Invalid block size: {0} (must be power of 2, 512-65536)")]
    InvalidBlockSize(usize),

    /// Invalid super-block size specified.
    #[error("Invalid super-block size: {size} (must be a power of 2 multiple of block size {block_size}, at most 64 MiB)")]
    InvalidSuperblockSize {
        /// Requested super-block size.
        size: usize,
        /// Configured block size.
        block_size: usize,
    },
}

/// Result type for devsync operations.
pub type Result<T> = std::result::Result<T, DevsyncError>;
