//! Tree open options

/// Default segment size for the backing multi-file logs (64 MiB)
pub const DEFAULT_FILE_SIZE: u64 = 1 << 26;

/// Default permission bits for created directories and files
pub const DEFAULT_FILE_MODE: u32 = 0o755;

/// Options controlling how a tree is opened
#[derive(Debug, Clone)]
pub struct Options {
    /// Open for reads only; `append` and `sync` are rejected
    pub read_only: bool,

    /// Make every flush durable (fsync on flush)
    pub synced: bool,

    /// Segment rollover threshold for the underlying multi-file logs
    pub file_size: u64,

    /// Unix permission bits applied when creating directories and files
    pub file_mode: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            read_only: false,
            synced: true,
            file_size: DEFAULT_FILE_SIZE,
            file_mode: DEFAULT_FILE_MODE,
        }
    }
}

impl Options {
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_synced(mut self, synced: bool) -> Self {
        self.synced = synced;
        self
    }

    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.file_size = file_size;
        self
    }

    pub fn with_file_mode(mut self, file_mode: u32) -> Self {
        self.file_mode = file_mode;
        self
    }

    /// Check structural validity; rejected options fail open with
    /// an illegal-arguments error.
    pub fn is_valid(&self) -> bool {
        self.file_size > 0
    }
}
