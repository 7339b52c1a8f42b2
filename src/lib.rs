//! Append-only authenticated hash tree storage core
//!
//! Persists an unbounded stream of opaque payloads into an RFC 6962-style
//! Merkle tree flattened over three append-only logs, and answers root,
//! inclusion-proof and consistency-proof queries for any point of its
//! history by direct offset lookups — the tree is never materialized in
//! memory.

pub mod applog;
pub mod error;
pub mod geometry;
pub mod options;
pub mod tree;
pub mod verify;

// Re-exports
pub use applog::{Appendable, Metadata, MultiFileLog, META_FILE_SIZE, META_VERSION};
pub use error::{AhtError, AhtResult, MultiError};
pub use options::Options;
pub use tree::{AhTree, Digest, NODE_PREFIX, VERSION};
pub use verify::{leaf_digest, verify_consistency, verify_inclusion};
