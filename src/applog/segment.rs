//! A single backing segment file
//!
//! Layout: magic (4 bytes), metadata length (4 bytes, big-endian),
//! metadata bytes, then payload. Payload offsets used by callers are
//! relative to the end of the header.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::Path;

/// Segment file magic bytes "AHTS"
const SEGMENT_MAGIC: [u8; 4] = *b"AHTS";

/// Fixed part of the header preceding the metadata bytes
const HEADER_FIXED: u64 = 8;

#[derive(Debug)]
pub struct SegmentFile {
    /// Handle used for positional reads; pread leaves the write cursor alone
    file: File,

    /// Buffered append stream; absent on read-only segments
    writer: Option<BufWriter<File>>,

    /// Byte offset where payload starts
    data_start: u64,

    /// Payload bytes physically present (high-water mark)
    len: u64,

    /// Payload-relative position of the write cursor
    wpos: u64,
}

impl SegmentFile {
    /// Create (or truncate) a segment, writing the header.
    pub fn create(path: &Path, metadata: &[u8], file_mode: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(file_mode))?;

        let reader = file.try_clone()?;
        let mut writer = BufWriter::new(file);

        writer.write_all(&SEGMENT_MAGIC)?;
        writer.write_all(&(metadata.len() as u32).to_be_bytes())?;
        writer.write_all(metadata)?;
        writer.flush()?;

        Ok(Self {
            file: reader,
            writer: Some(writer),
            data_start: HEADER_FIXED + metadata.len() as u64,
            len: 0,
            wpos: 0,
        })
    }

    /// Open an existing segment, returning the handle and its metadata.
    pub fn open(path: &Path, read_only: bool) -> io::Result<(Self, Vec<u8>)> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact_at(&mut magic, 0)?;
        if magic != SEGMENT_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad segment magic",
            ));
        }

        let mut meta_len_bytes = [0u8; 4];
        file.read_exact_at(&mut meta_len_bytes, 4)?;
        let meta_len = u64::from(u32::from_be_bytes(meta_len_bytes));

        let mut metadata = vec![0u8; meta_len as usize];
        file.read_exact_at(&mut metadata, HEADER_FIXED)?;

        let data_start = HEADER_FIXED + meta_len;
        let physical = file.metadata()?.len();
        if physical < data_start {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "segment shorter than its header",
            ));
        }
        let len = physical - data_start;

        let writer = if read_only {
            None
        } else {
            let mut w = BufWriter::new(file.try_clone()?);
            w.seek(SeekFrom::Start(physical))?;
            Some(w)
        };

        Ok((
            Self {
                file,
                writer,
                data_start,
                len,
                wpos: len,
            },
            metadata,
        ))
    }

    /// Payload bytes physically present.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Write `buf` at payload offset `off`, overwriting any stale bytes.
    pub fn write_at(&mut self, off: u64, buf: &[u8]) -> io::Result<()> {
        let data_start = self.data_start;
        let writer = self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::PermissionDenied, "segment is read-only")
        })?;

        if self.wpos != off {
            writer.seek(SeekFrom::Start(data_start + off))?;
            self.wpos = off;
        }

        writer.write_all(buf)?;
        self.wpos += buf.len() as u64;
        self.len = self.len.max(self.wpos);
        Ok(())
    }

    /// Read exactly `buf.len()` bytes at payload offset `off`.
    ///
    /// Only flushed bytes are visible here.
    pub fn read_at(&self, off: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact_at(buf, self.data_start + off)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.file.sync_all()
    }
}
