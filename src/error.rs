//! Core error types

use std::fmt;
use thiserror::Error;

/// Main error type for the appendable hash tree
#[derive(Debug, Error)]
pub enum AhtError {
    // ========== Caller Errors ==========
    /// Bad caller input (proof range, index, options)
    #[error("illegal arguments")]
    IllegalArguments,

    /// During open, the given path exists and is not a directory
    #[error("path is not a directory")]
    PathNotADirectory,

    /// Query references a leaf index beyond the committed size
    #[error("attempt to read nonexistent data")]
    NonExistentData,

    /// Root-family call on an empty tree
    #[error("empty tree")]
    EmptyTree,

    // ========== Corruption Errors ==========
    /// Commit log length is not record-aligned, or its metadata is missing
    #[error("commit log is corrupted")]
    CorruptedCommitLog,

    /// Payload log is shorter than the last commit record's extent
    #[error("payload log is corrupted")]
    CorruptedPayloadData,

    /// Hash log is shorter than the committed node count requires
    #[error("hash log is corrupted")]
    CorruptedDigests,

    // ========== Lifecycle Errors ==========
    /// Write attempted on a read-only handle
    #[error("cannot append when opened in read-only mode")]
    ReadOnly,

    /// Any operation after close
    #[error("already closed")]
    AlreadyClosed,

    // ========== Pass-through ==========
    /// I/O error from the underlying log
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Aggregate of several underlying failures (returned by close)
    #[error(transparent)]
    Multi(#[from] MultiError),
}

/// Collection of errors gathered by an operation that must not
/// short-circuit, such as closing all three logs.
#[derive(Debug)]
pub struct MultiError {
    pub errors: Vec<AhtError>,
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for e in &self.errors {
            write!(f, " [{e}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

/// Core result type alias
pub type AhtResult<T> = Result<T, AhtError>;

impl AhtError {
    /// Check if the error indicates unrecoverable on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            AhtError::CorruptedCommitLog
                | AhtError::CorruptedPayloadData
                | AhtError::CorruptedDigests
        )
    }
}
