//! Append-only log abstraction and its multi-file backing store
//!
//! The tree engine depends only on the [`Appendable`] contract; the
//! provided implementation is a directory of fixed-capacity segment
//! files, each carrying a metadata header.

mod metadata;
mod multifile;
mod segment;

pub use metadata::{Metadata, META_FILE_SIZE, META_VERSION};
pub use multifile::MultiFileLog;

use std::io;

/// An append-only byte log with random-access reads.
///
/// `set_offset` performs a *logical* truncation: it repositions the append
/// cursor without shrinking the backing files, and later appends overwrite
/// whatever trailing bytes were left behind. Reads must target data that
/// has already been flushed.
pub trait Appendable: Send {
    /// Opaque header bytes recorded when the log was created.
    fn metadata(&self) -> &[u8];

    /// Current logical length in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Append at the current end of the log, returning the starting
    /// offset of the write and the number of bytes written.
    fn append(&mut self, bs: &[u8]) -> io::Result<(u64, usize)>;

    /// Logically truncate the log to `off`.
    fn set_offset(&mut self, off: u64) -> io::Result<()>;

    /// Propagate the segment rollover threshold recovered from metadata.
    fn set_file_size(&mut self, file_size: u64);

    /// Random-access read at `off`, filling `buf` completely.
    fn read_at(&mut self, buf: &mut [u8], off: u64) -> io::Result<usize>;

    /// Push buffered writes to the kernel.
    fn flush(&mut self) -> io::Result<()>;

    /// Durable fsync of all written data.
    fn sync(&mut self) -> io::Result<()>;

    /// Flush, sync and release the backing files.
    fn close(&mut self) -> io::Result<()>;
}
