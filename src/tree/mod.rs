//! Appendable hash tree engine
//!
//! The tree is flattened into three append-only logs: the payload log
//! holds the raw entries, the hash log holds every node digest ever
//! finalized (32 bytes each, at arithmetically derived slots), and the
//! commit log holds one fixed-width record per committed leaf. The commit
//! log is the sole source of truth for the committed leaf count; the
//! other two may carry trailing uncommitted bytes that the next append
//! overwrites.
//!
//! No in-memory tree is kept. Node lookups, roots and proof paths are all
//! direct offset reads into the hash log.

mod proof;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use sha2::{Digest as _, Sha256};

use crate::applog::{Appendable, Metadata, MultiFileLog, META_FILE_SIZE, META_VERSION};
use crate::error::{AhtError, AhtResult, MultiError};
use crate::geometry::{levels_at, nodes_until, nodes_upto, tree_height};
use crate::options::Options;

/// A node digest
pub type Digest = [u8; 32];

/// Domain separation prefix for internal nodes
pub const NODE_PREFIX: u8 = 0x01;

/// On-disk format version
pub const VERSION: u64 = 1;

/// Size of one node digest record in the hash log
const DIGEST_SIZE: usize = 32;

/// Size of one commit record: payload offset (8) and payload length (4)
const COMMIT_ENTRY_SIZE: u64 = 12;

/// Digest scratch capacity: a leaf plus one promoted hash per possible
/// level, which bounds any append for leaf indices up to 2^64
const DIGESTS_CAP: usize = 256 * DIGEST_SIZE;

/// The appendable hash tree
///
/// All mutable state sits behind one engine-wide mutex; every public
/// operation holds it for its whole duration.
pub struct AhTree {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for AhTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AhTree").finish_non_exhaustive()
    }
}

struct Inner {
    p_log: Box<dyn Appendable>,
    d_log: Box<dyn Appendable>,
    c_log: Box<dyn Appendable>,

    /// Committed extent of the payload log
    p_log_size: u64,

    /// Committed extent of the hash log
    d_log_size: u64,

    /// Length of the commit log; committed leaf count times 12
    c_log_size: u64,

    read_only: bool,
    closed: bool,

    /// Scratch area staging the digests written by one append
    digests: Box<[u8; DIGESTS_CAP]>,
}

impl AhTree {
    /// Create or recover a tree rooted at `path`.
    ///
    /// The directory is created if missing. Payload, hash and commit logs
    /// live in the `data/`, `tree/` and `commit/` subdirectories.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArguments` for invalid options,
    /// `PathNotADirectory` if `path` exists and is not a directory, and
    /// any recovery error from [`AhTree::open_with`].
    pub fn open(path: impl AsRef<Path>, opts: Options) -> AhtResult<Self> {
        if !opts.is_valid() {
            return Err(AhtError::IllegalArguments);
        }

        let path = path.as_ref();
        match fs::metadata(path) {
            Ok(info) if !info.is_dir() => return Err(AhtError::PathNotADirectory),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir(path)?;
                fs::set_permissions(path, fs::Permissions::from_mode(opts.file_mode))?;
            }
            Err(e) => return Err(e.into()),
        }

        let mut metadata = Metadata::new();
        metadata.put_int(META_VERSION, VERSION);
        metadata.put_int(META_FILE_SIZE, opts.file_size);

        let p_log = MultiFileLog::open(path.join("data"), "dat", &metadata, &opts)?;
        let d_log = MultiFileLog::open(path.join("tree"), "sha", &metadata, &opts)?;
        let c_log = MultiFileLog::open(path.join("commit"), "di", &metadata, &opts)?;

        Self::open_with(Box::new(p_log), Box::new(d_log), Box::new(c_log), opts)
    }

    /// Recover a tree from caller-supplied logs.
    ///
    /// The commit log is authoritative: its metadata supplies the segment
    /// rollover threshold and its length determines the committed leaf
    /// count. The payload and hash logs may extend past the committed
    /// prefix; they must not fall short of it.
    pub fn open_with(
        mut p_log: Box<dyn Appendable>,
        mut d_log: Box<dyn Appendable>,
        mut c_log: Box<dyn Appendable>,
        opts: Options,
    ) -> AhtResult<Self> {
        if !opts.is_valid() {
            return Err(AhtError::IllegalArguments);
        }

        let metadata =
            Metadata::from_bytes(c_log.metadata()).map_err(|_| AhtError::CorruptedCommitLog)?;
        let file_size = metadata
            .get_int(META_FILE_SIZE)
            .ok_or(AhtError::CorruptedCommitLog)?;

        p_log.set_file_size(file_size);
        d_log.set_file_size(file_size);
        c_log.set_file_size(file_size);

        let c_log_size = c_log.size()?;
        if c_log_size % COMMIT_ENTRY_SIZE != 0 {
            return Err(AhtError::CorruptedCommitLog);
        }

        let n = c_log_size / COMMIT_ENTRY_SIZE;

        let mut p_log_size = 0u64;
        if c_log_size > 0 {
            let mut entry = [0u8; COMMIT_ENTRY_SIZE as usize];
            c_log.read_at(&mut entry, c_log_size - COMMIT_ENTRY_SIZE)?;

            let p_off = u64::from_be_bytes(entry[..8].try_into().unwrap());
            let p_size = u32::from_be_bytes(entry[8..].try_into().unwrap());

            // The committed extent covers the length prefix as well.
            p_log_size = p_off + 4 + u64::from(p_size);
        }

        if p_log.size()? < p_log_size {
            return Err(AhtError::CorruptedPayloadData);
        }

        // Committed extent of the hash log; like the payload log it may
        // physically exceed this, and the next append overwrites the
        // excess, but it must never fall short.
        let d_log_size = nodes_upto(n) * DIGEST_SIZE as u64;
        if d_log.size()? < d_log_size {
            return Err(AhtError::CorruptedDigests);
        }

        let mut inner = Inner {
            p_log,
            d_log,
            c_log,
            p_log_size,
            d_log_size,
            c_log_size,
            read_only: opts.read_only,
            closed: false,
            digests: Box::new([0u8; DIGESTS_CAP]),
        };

        if n > 0 {
            let root = inner.root_at(n)?;
            tracing::info!(
                leaves = n,
                root = %hex::encode(&root[..8]),
                "recovered appendable hash tree"
            );
        } else {
            tracing::debug!("opened empty appendable hash tree");
        }

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Append a payload, returning its 1-based leaf index and leaf digest.
    ///
    /// The returned digest is the leaf hash of the payload, not the
    /// updated tree root; the root is available through [`AhTree::root`].
    pub fn append(&self, payload: &[u8]) -> AhtResult<(u64, Digest)> {
        let mut inner = self.lock();

        if inner.closed {
            return Err(AhtError::AlreadyClosed);
        }
        if inner.read_only {
            return Err(AhtError::ReadOnly);
        }
        if payload.len() > u32::MAX as usize {
            return Err(AhtError::IllegalArguments);
        }

        inner.append(payload)
    }

    /// Committed leaf count.
    pub fn size(&self) -> u64 {
        let inner = self.lock();
        inner.c_log_size / COMMIT_ENTRY_SIZE
    }

    /// Root of the tree at its current size.
    pub fn root(&self) -> AhtResult<Digest> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(AhtError::AlreadyClosed);
        }
        let n = inner.c_log_size / COMMIT_ENTRY_SIZE;
        inner.root_at(n)
    }

    /// Root of the tree as it was at size `n`.
    ///
    /// Roots are stable: once leaf `n` is committed, `root_at(n)` never
    /// changes again.
    pub fn root_at(&self, n: u64) -> AhtResult<Digest> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(AhtError::AlreadyClosed);
        }
        inner.root_at(n)
    }

    /// Retrieve the payload committed as leaf `n` (1-based).
    pub fn data_at(&self, n: u64) -> AhtResult<Vec<u8>> {
        let mut inner = self.lock();

        if inner.closed {
            return Err(AhtError::AlreadyClosed);
        }
        if n < 1 {
            return Err(AhtError::IllegalArguments);
        }
        if n > inner.c_log_size / COMMIT_ENTRY_SIZE {
            return Err(AhtError::NonExistentData);
        }

        let mut entry = [0u8; COMMIT_ENTRY_SIZE as usize];
        inner
            .c_log
            .read_at(&mut entry, (n - 1) * COMMIT_ENTRY_SIZE)?;

        let p_off = u64::from_be_bytes(entry[..8].try_into().unwrap());
        let p_size = u32::from_be_bytes(entry[8..].try_into().unwrap());

        let mut payload = vec![0u8; p_size as usize];
        inner.p_log.read_at(&mut payload, p_off + 4)?;

        Ok(payload)
    }

    /// Audit path proving leaf `i` is included in the tree of size `j`.
    pub fn inclusion_proof(&self, i: u64, j: u64) -> AhtResult<Vec<Digest>> {
        let mut inner = self.lock();

        if inner.closed {
            return Err(AhtError::AlreadyClosed);
        }
        if i < 1 || i > j {
            return Err(AhtError::IllegalArguments);
        }
        if j > inner.c_log_size / COMMIT_ENTRY_SIZE {
            return Err(AhtError::NonExistentData);
        }

        let mut path = Vec::new();
        inner.inclusion_path(i, j, tree_height(j), &mut path)?;
        path.reverse();
        Ok(path)
    }

    /// Path proving the tree of size `i` is a prefix of the tree of size `j`.
    pub fn consistency_proof(&self, i: u64, j: u64) -> AhtResult<Vec<Digest>> {
        let mut inner = self.lock();

        if inner.closed {
            return Err(AhtError::AlreadyClosed);
        }
        if i < 1 || i > j {
            return Err(AhtError::IllegalArguments);
        }
        if j > inner.c_log_size / COMMIT_ENTRY_SIZE {
            return Err(AhtError::NonExistentData);
        }

        let mut path = Vec::new();
        inner.consistency_path(i, j, tree_height(j), &mut path)?;
        path.reverse();
        Ok(path)
    }

    /// Durably flush all three logs. A no-op on an empty tree.
    pub fn sync(&self) -> AhtResult<()> {
        let mut inner = self.lock();

        if inner.closed {
            return Err(AhtError::AlreadyClosed);
        }
        if inner.read_only {
            return Err(AhtError::ReadOnly);
        }
        if inner.c_log_size == 0 {
            return Ok(());
        }

        inner.p_log.sync()?;
        inner.d_log.sync()?;
        inner.c_log.sync()?;
        Ok(())
    }

    /// Close all three logs, collecting every failure.
    ///
    /// All logs are attempted regardless of earlier failures; two or more
    /// errors are aggregated into a [`MultiError`].
    pub fn close(&self) -> AhtResult<()> {
        let mut inner = self.lock();

        if inner.closed {
            return Err(AhtError::AlreadyClosed);
        }
        inner.closed = true;

        let inner = &mut *inner;
        let mut errors = Vec::new();
        for log in [&mut inner.p_log, &mut inner.d_log, &mut inner.c_log] {
            if let Err(e) = log.close() {
                errors.push(AhtError::Io(e));
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.pop().unwrap()),
            _ => Err(MultiError { errors }.into()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn append(&mut self, payload: &[u8]) -> AhtResult<(u64, Digest)> {
        // Overwrite any partially written, uncommitted trailing bytes.
        self.p_log.set_offset(self.p_log_size)?;

        let len_prefix = (payload.len() as u32).to_be_bytes();
        let (p_off, _) = self.p_log.append(&len_prefix)?;
        if !payload.is_empty() {
            self.p_log.append(payload)?;
        }

        let n = self.c_log_size / COMMIT_ENTRY_SIZE + 1;

        let leaf: Digest = Sha256::digest(payload).into();
        self.digests[..DIGEST_SIZE].copy_from_slice(&leaf);
        let mut d_count = 1usize;

        let mut h = leaf;
        let mut w = n - 1;
        let mut k = n - 1;
        let mut l = 0u32;

        while w > 0 {
            if w & 1 == 1 {
                let sibling = self.node(k, l)?;

                let mut b = [0u8; 1 + 2 * DIGEST_SIZE];
                b[0] = NODE_PREFIX;
                b[1..1 + DIGEST_SIZE].copy_from_slice(&sibling);
                b[1 + DIGEST_SIZE..].copy_from_slice(&h);

                h = Sha256::digest(b).into();

                self.digests[d_count * DIGEST_SIZE..(d_count + 1) * DIGEST_SIZE]
                    .copy_from_slice(&h);
                d_count += 1;
            }

            k &= !(1u64 << l);
            w >>= 1;
            l += 1;
        }

        self.p_log.flush()?;

        // Overwrite any partially written, uncommitted trailing bytes.
        self.d_log.set_offset(self.d_log_size)?;
        self.d_log.append(&self.digests[..d_count * DIGEST_SIZE])?;
        self.d_log.flush()?;

        // Only once payloads and digests are flushed does the commit
        // record make the leaf visible.
        let mut entry = [0u8; COMMIT_ENTRY_SIZE as usize];
        entry[..8].copy_from_slice(&p_off.to_be_bytes());
        entry[8..].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        self.c_log.append(&entry)?;
        self.c_log.flush()?;

        self.p_log_size += 4 + payload.len() as u64;
        self.d_log_size += (d_count * DIGEST_SIZE) as u64;
        self.c_log_size += COMMIT_ENTRY_SIZE;

        Ok((n, leaf))
    }

    /// Read the level-`l` digest finalized by the append of leaf `k`.
    fn node(&mut self, k: u64, l: u32) -> AhtResult<Digest> {
        let slot = nodes_until(k) + u64::from(l);

        let mut h = [0u8; DIGEST_SIZE];
        self.d_log.read_at(&mut h, slot * DIGEST_SIZE as u64)?;
        Ok(h)
    }

    fn root_at(&mut self, n: u64) -> AhtResult<Digest> {
        if self.c_log_size == 0 || n == 0 {
            return Err(AhtError::EmptyTree);
        }
        if n > self.c_log_size / COMMIT_ENTRY_SIZE {
            return Err(AhtError::NonExistentData);
        }

        // The last digest written by the append of leaf n is, by
        // construction, the root over leaves 1..=n.
        self.node(n, levels_at(n))
    }
}
