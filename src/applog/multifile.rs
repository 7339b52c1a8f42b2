//! Segmented multi-file append-only log
//!
//! A directory of fixed-capacity segment files named `{index:08}.{ext}`.
//! Logical offsets map to `(segment, in-segment offset)` through the
//! rollover threshold, so appends spill into a fresh segment exactly at
//! the `file_size` boundary.
//!
//! Truncation via `set_offset` is logical: stale bytes past the cursor
//! stay on disk until overwritten. Segments are never recreated or
//! shrunk — a segment that already exists (including a stale later one
//! left behind by a rewind) is reused as-is, with writes landing at the
//! append cursor and any bytes past it remaining as garbage. On open,
//! the logical size is derived from the physical segment lengths, so the
//! log may report more than its owner committed; the owner is expected
//! to reconcile through its own commit records.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::metadata::{Metadata, META_FILE_SIZE};
use super::segment::SegmentFile;
use super::Appendable;
use crate::options::Options;

#[derive(Debug)]
pub struct MultiFileLog {
    dir: PathBuf,
    ext: String,

    /// Segment rollover threshold (payload bytes per segment)
    file_size: u64,

    /// Serialized metadata written into every segment header
    metadata: Vec<u8>,

    /// All known segments, keyed by index
    segments: BTreeMap<u64, SegmentFile>,

    /// Logical end of the log
    offset: u64,

    synced: bool,
    read_only: bool,
    file_mode: u32,
    closed: bool,
}

impl MultiFileLog {
    /// Open (or create) the log rooted at `dir`.
    ///
    /// A fresh log is seeded with one empty segment carrying `metadata`.
    /// An existing log takes its metadata, and its `FILE_SIZE` geometry,
    /// from segment 0.
    pub fn open(
        dir: impl AsRef<Path>,
        ext: &str,
        metadata: &Metadata,
        opts: &Options,
    ) -> io::Result<Self> {
        if opts.file_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "file_size must be greater than zero",
            ));
        }

        let dir = dir.as_ref().to_path_buf();

        if !dir.exists() {
            if opts.read_only {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("log directory {} does not exist", dir.display()),
                ));
            }
            fs::create_dir_all(&dir)?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(opts.file_mode))?;
        }

        let indices = Self::scan_segment_indices(&dir, ext)?;

        let mut log = Self {
            dir,
            ext: ext.to_string(),
            file_size: opts.file_size,
            metadata: metadata.to_bytes(),
            segments: BTreeMap::new(),
            offset: 0,
            synced: opts.synced,
            read_only: opts.read_only,
            file_mode: opts.file_mode,
            closed: false,
        };

        if indices.is_empty() {
            if opts.read_only {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "cannot open an empty log in read-only mode",
                ));
            }
            let seg = SegmentFile::create(&log.segment_path(0), &log.metadata, log.file_mode)?;
            log.segments.insert(0, seg);
            tracing::debug!(dir = %log.dir.display(), "created empty log");
            return Ok(log);
        }

        for &idx in &indices {
            let (seg, meta_bytes) = SegmentFile::open(&log.segment_path(idx), opts.read_only)?;
            if idx == 0 {
                log.metadata = meta_bytes;
            }
            log.segments.insert(idx, seg);
        }

        // An existing log is self-describing: its stored rollover
        // threshold wins over the caller's, because the on-disk offsets
        // were laid out with it.
        if let Ok(stored) = Metadata::from_bytes(&log.metadata) {
            if let Some(fs_size) = stored.get_int(META_FILE_SIZE) {
                if fs_size > 0 {
                    log.file_size = fs_size;
                }
            }
        }

        log.offset = log.derive_offset();
        Ok(log)
    }

    /// Segments present on disk, validated to be contiguous from 0.
    fn scan_segment_indices(dir: &Path, ext: &str) -> io::Result<Vec<u64>> {
        let mut indices = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(idx) = stem.parse::<u64>() else {
                continue;
            };
            indices.push(idx);
        }

        indices.sort_unstable();

        for (pos, &idx) in indices.iter().enumerate() {
            if idx != pos as u64 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("segment files are not contiguous: missing index {pos}"),
                ));
            }
        }

        Ok(indices)
    }

    fn segment_path(&self, idx: u64) -> PathBuf {
        self.dir.join(format!("{:08}.{}", idx, self.ext))
    }

    /// Logical end derived from physical segment lengths.
    fn derive_offset(&self) -> u64 {
        match self.segments.last_key_value() {
            Some((&last_idx, seg)) => last_idx * self.file_size + seg.len(),
            None => 0,
        }
    }

    fn segment_for_write(&mut self, idx: u64) -> io::Result<&mut SegmentFile> {
        if !self.segments.contains_key(&idx) {
            let seg = SegmentFile::create(&self.segment_path(idx), &self.metadata, self.file_mode)?;
            self.segments.insert(idx, seg);
            tracing::debug!(dir = %self.dir.display(), segment = idx, "rolled over to new segment");
        }
        Ok(self.segments.get_mut(&idx).unwrap())
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "log is closed",
            ));
        }
        Ok(())
    }
}

impl Appendable for MultiFileLog {
    fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    fn size(&self) -> io::Result<u64> {
        self.ensure_open()?;
        Ok(self.offset)
    }

    fn append(&mut self, bs: &[u8]) -> io::Result<(u64, usize)> {
        self.ensure_open()?;
        if self.read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "log is read-only",
            ));
        }

        let start = self.offset;
        let mut cur = start;
        let mut rem = bs;

        while !rem.is_empty() {
            let idx = cur / self.file_size;
            let in_off = cur % self.file_size;
            let room = (self.file_size - in_off) as usize;
            let take = room.min(rem.len());

            let seg = self.segment_for_write(idx)?;
            seg.write_at(in_off, &rem[..take])?;

            cur += take as u64;
            rem = &rem[take..];
        }

        self.offset = cur;
        Ok((start, bs.len()))
    }

    fn set_offset(&mut self, off: u64) -> io::Result<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "log is read-only",
            ));
        }
        self.offset = off;
        Ok(())
    }

    fn set_file_size(&mut self, file_size: u64) {
        if file_size == 0 || file_size == self.file_size {
            return;
        }
        self.file_size = file_size;
        self.offset = self.derive_offset();
    }

    fn read_at(&mut self, buf: &mut [u8], off: u64) -> io::Result<usize> {
        self.ensure_open()?;

        let len = buf.len();
        let mut cur = off;
        let mut filled = 0usize;

        while filled < len {
            let idx = cur / self.file_size;
            let in_off = cur % self.file_size;
            let room = (self.file_size - in_off) as usize;
            let take = room.min(len - filled);

            let seg = self.segments.get(&idx).ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of log")
            })?;
            seg.read_at(in_off, &mut buf[filled..filled + take])?;

            cur += take as u64;
            filled += take;
        }

        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        for seg in self.segments.values_mut() {
            seg.flush()?;
            if self.synced {
                seg.sync()?;
            }
        }
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        for seg in self.segments.values_mut() {
            seg.sync()?;
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        if !self.read_only {
            for seg in self.segments.values_mut() {
                seg.sync()?;
            }
        }
        self.segments.clear();
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applog::META_VERSION;
    use tempfile::tempdir;

    fn test_metadata(file_size: u64) -> Metadata {
        let mut meta = Metadata::new();
        meta.put_int(META_VERSION, 1).put_int(META_FILE_SIZE, file_size);
        meta
    }

    fn small_opts(file_size: u64) -> Options {
        Options::default().with_synced(false).with_file_size(file_size)
    }

    #[test]
    fn test_append_read_roundtrip() {
        let dir = tempdir().unwrap();
        let mut log =
            MultiFileLog::open(dir.path(), "dat", &test_metadata(1024), &small_opts(1024)).unwrap();

        let (off1, n1) = log.append(b"alpha").unwrap();
        let (off2, _) = log.append(b"beta").unwrap();
        assert_eq!((off1, n1), (0, 5));
        assert_eq!(off2, 5);
        assert_eq!(log.size().unwrap(), 9);

        log.flush().unwrap();

        let mut buf = [0u8; 4];
        log.read_at(&mut buf, 5).unwrap();
        assert_eq!(&buf, b"beta");
    }

    #[test]
    fn test_rollover_across_segments() {
        let dir = tempdir().unwrap();
        let mut log =
            MultiFileLog::open(dir.path(), "dat", &test_metadata(8), &small_opts(8)).unwrap();

        // 20 bytes with an 8-byte threshold spans three segments.
        log.append(b"abcdefghijklmnopqrst").unwrap();
        log.flush().unwrap();

        assert!(dir.path().join("00000000.dat").exists());
        assert!(dir.path().join("00000001.dat").exists());
        assert!(dir.path().join("00000002.dat").exists());

        let mut buf = [0u8; 20];
        log.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"abcdefghijklmnopqrst");

        // A read spanning the segment boundary.
        let mut buf = [0u8; 6];
        log.read_at(&mut buf, 6).unwrap();
        assert_eq!(&buf, b"ghijkl");
    }

    #[test]
    fn test_set_offset_overwrites() {
        let dir = tempdir().unwrap();
        let mut log =
            MultiFileLog::open(dir.path(), "dat", &test_metadata(1024), &small_opts(1024)).unwrap();

        log.append(b"committedGARBAGE").unwrap();
        log.flush().unwrap();

        log.set_offset(9).unwrap();
        assert_eq!(log.size().unwrap(), 9);

        log.append(b"fresh").unwrap();
        log.flush().unwrap();
        assert_eq!(log.size().unwrap(), 14);

        let mut buf = [0u8; 14];
        log.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"committedfresh");
    }

    #[test]
    fn test_reopen_derives_size_and_keeps_metadata() {
        let dir = tempdir().unwrap();
        let meta = test_metadata(16);

        {
            let mut log = MultiFileLog::open(dir.path(), "dat", &meta, &small_opts(16)).unwrap();
            log.append(&[9u8; 40]).unwrap();
            log.sync().unwrap();
        }

        let mut log = MultiFileLog::open(dir.path(), "dat", &meta, &small_opts(16)).unwrap();
        assert_eq!(log.size().unwrap(), 40);

        let restored = Metadata::from_bytes(log.metadata()).unwrap();
        assert_eq!(restored.get_int(META_FILE_SIZE), Some(16));

        let mut buf = [0u8; 40];
        log.read_at(&mut buf, 0).unwrap();
        assert_eq!(buf, [9u8; 40]);
    }

    #[test]
    fn test_stored_file_size_wins_on_reopen() {
        let dir = tempdir().unwrap();
        let meta = test_metadata(16);

        {
            let mut log = MultiFileLog::open(dir.path(), "dat", &meta, &small_opts(16)).unwrap();
            log.append(&[1u8; 24]).unwrap();
            log.sync().unwrap();
        }

        // Caller passes a different threshold; the stored one governs.
        let log = MultiFileLog::open(dir.path(), "dat", &meta, &small_opts(4096)).unwrap();
        assert_eq!(log.size().unwrap(), 24);
    }

    #[test]
    fn test_read_only_mode() {
        let dir = tempdir().unwrap();
        let meta = test_metadata(1024);

        {
            let mut log = MultiFileLog::open(dir.path(), "dat", &meta, &small_opts(1024)).unwrap();
            log.append(b"data").unwrap();
            log.sync().unwrap();
        }

        let opts = small_opts(1024).with_read_only(true);
        let mut log = MultiFileLog::open(dir.path(), "dat", &meta, &opts).unwrap();
        assert_eq!(log.size().unwrap(), 4);
        assert!(log.append(b"x").is_err());

        let mut buf = [0u8; 4];
        log.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"data");
    }

    #[test]
    fn test_zero_file_size_is_rejected() {
        let dir = tempdir().unwrap();
        let err =
            MultiFileLog::open(dir.path(), "dat", &test_metadata(0), &small_opts(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_read_only_missing_log_fails() {
        let dir = tempdir().unwrap();
        let opts = small_opts(1024).with_read_only(true);
        let missing = dir.path().join("nope");
        assert!(MultiFileLog::open(&missing, "dat", &test_metadata(1024), &opts).is_err());
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut log =
            MultiFileLog::open(dir.path(), "dat", &test_metadata(64), &small_opts(64)).unwrap();
        log.append(b"abc").unwrap();
        log.flush().unwrap();

        let mut buf = [0u8; 8];
        assert!(log.read_at(&mut buf, 100).is_err());
    }

    #[test]
    fn test_closed_log_rejects_operations() {
        let dir = tempdir().unwrap();
        let mut log =
            MultiFileLog::open(dir.path(), "dat", &test_metadata(64), &small_opts(64)).unwrap();
        log.close().unwrap();

        assert!(log.append(b"x").is_err());
        assert!(log.size().is_err());
        assert!(log.flush().is_err());
        // A second close is a no-op.
        assert!(log.close().is_ok());
    }
}
