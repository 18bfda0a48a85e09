//! Progress reporting for long-running syncs.

use std::io::Write;

use crate::sync::SyncObserver;

/// Cumulative byte counters at a point in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Bytes compared so far.
    pub bytes_read: u64,
    /// Bytes of changed blocks queued for writing so far.
    pub bytes_written: u64,
}

impl Progress {
    /// Whole mebibytes read.
    #[must_use]
    pub const fn read_mb(&self) -> u64 {
        self.bytes_read >> 20
    }

    /// Whole mebibytes written.
    #[must_use]
    pub const fn written_mb(&self) -> u64 {
        self.bytes_written >> 20
    }
}

/// Writes a carriage-return overwritten progress line to a terminal.
#[derive(Debug)]
pub struct ConsoleProgress<W: Write> {
    out: W,
}

impl<W: Write> ConsoleProgress<W> {
    /// Report to `out`.
    #[must_use]
    pub const fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> SyncObserver for ConsoleProgress<W> {
    fn on_progress(&mut self, progress: &Progress) {
        // Progress output is best effort; a closed stdout must not abort a sync.
        let _ = write!(
            self.out,
            "Read {}MB / Wrote {}MB  \r",
            progress.read_mb(),
            progress.written_mb()
        );
        let _ = self.out.flush();
    }
}
