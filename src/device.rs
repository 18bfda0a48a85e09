//! Positioned I/O over block devices and files.
//!
//! Every read and write names its own byte offset, so the source and the
//! destination never share a file cursor.

#[cfg(test)]
use std::cell::Cell;
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use crate::error::{DevsyncError, Result};

/// A device that supports offset-explicit reads and writes.
pub trait BlockDevice {
    /// Read into `buf` starting at byte `offset`.
    ///
    /// Returns the number of bytes read; `0` means end of device.
    ///
    /// # Errors
    ///
    /// Returns the underlying OS error.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write `buf` starting at byte `offset`.
    ///
    /// Returns the number of bytes the device accepted.
    ///
    /// # Errors
    ///
    /// Returns the underlying OS error.
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;
}

impl<T: BlockDevice + ?Sized> BlockDevice for &T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        (**self).write_at(buf, offset)
    }
}

#[cfg(unix)]
impl BlockDevice for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl BlockDevice for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(self, buf, offset)
    }
}

/// Read until `buf` is full or the device reports end of data.
///
/// A single positioned read may return fewer bytes than requested without
/// being at the end, so this keeps reading. `Interrupted` is retried.
///
/// # Errors
///
/// Returns the first non-`Interrupted` I/O error.
pub fn read_full_at<D: BlockDevice + ?Sized>(
    device: &D,
    buf: &mut [u8],
    offset: u64,
) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match device.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Open the source read-only.
///
/// # Errors
///
/// Returns [`DevsyncError::Open`] with the path on failure.
pub fn open_source<P: AsRef<Path>>(path: P) -> Result<File> {
    let path = path.as_ref();
    File::open(path).map_err(|source| DevsyncError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Open the destination read-write, creating it (mode 0666) if absent.
///
/// # Errors
///
/// Returns [`DevsyncError::Open`] with the path on failure.
pub fn open_destination<P: AsRef<Path>>(path: P) -> Result<File> {
    let path = path.as_ref();
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }
    options.open(path).map_err(|source| DevsyncError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// In-memory device that records every write call.
///
/// The write log makes it possible to check exactly which ranges a sync
/// touched without going through the filesystem.
#[derive(Debug, Default)]
pub struct MemoryDevice {
    data: RefCell<Vec<u8>>,
    writes: RefCell<Vec<(u64, usize)>>,
    #[cfg(test)]
    max_write: Cell<Option<usize>>,
}

impl MemoryDevice {
    /// Create a device holding `data`.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: RefCell::new(data),
            ..Self::default()
        }
    }

    /// Cap every write call at `limit` bytes, simulating a short write.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn with_max_write(self, limit: usize) -> Self {
        self.max_write.set(Some(limit));
        self
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    /// `(offset, len)` of every write call so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(u64, usize)> {
        self.writes.borrow().clone()
    }
}

impl BlockDevice for MemoryDevice {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let data = self.data.borrow();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        #[cfg(test)]
        let n = self.max_write.get().map_or(buf.len(), |limit| buf.len().min(limit));
        #[cfg(not(test))]
        let n = buf.len();
        let mut data = self.data.borrow_mut();
        if data.len() < start + n {
            data.resize(start + n, 0);
        }
        data[start..start + n].copy_from_slice(&buf[..n]);
        self.writes.borrow_mut().push((offset, buf.len()));
        Ok(n)
    }
}
