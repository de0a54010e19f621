//! Error types for the holotree library
//!
//! A single error enum covers every operation. Work units executed on the
//! [`WorkerPool`](crate::worker::WorkerPool) return these errors instead of
//! panicking; the pool records the first failure and `sync()` surfaces it
//! exactly once.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the holotree library
pub type Result<T> = std::result::Result<T, HoloError>;

/// Main error type for all holotree operations
#[derive(Debug, Error)]
pub enum HoloError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O operation failed on a specific path
    #[error("{action} {path:?}, reason: {source}")]
    PathIo {
        /// Operation that failed (open, create, read, ...)
        action: &'static str,
        /// Path the operation was applied to
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// A catalog references a digest whose body is absent from the library
    #[error("content for {path:?} [{digest}] is missing")]
    MissingContent {
        /// Tree path of the file whose body is missing
        path: PathBuf,
        /// Digest the catalog expected to find
        digest: String,
    },

    /// Catalog not found in the library
    #[error("catalog not found: {0}")]
    CatalogNotFound(String),

    /// Removal failed even after the retry loop
    #[error("remove failure [{context}, {controller}, {space}], reason: {source}")]
    RemoveFailure {
        /// Call-site tag (e.g. "file", "directory")
        context: String,
        /// Controller identity of this process
        controller: String,
        /// Space tag of this process
        space: String,
        /// Underlying OS error from the last attempt
        #[source]
        source: std::io::Error,
    },

    /// Rename failed even after the two-phase retry
    #[error("rename failure [{context}, {controller}, {space}, {origin}], reason: {source}")]
    RenameFailure {
        /// Call-site tag (e.g. "liftfile", "dropfile")
        context: String,
        /// Controller identity of this process
        controller: String,
        /// Space tag of this process
        space: String,
        /// Which leg failed: "source" or "target"
        origin: &'static str,
        /// Underlying OS error from the last attempt
        #[source]
        source: std::io::Error,
    },

    /// A rewrite offset lies past the decompressed body length
    #[error("rewrite offset {offset} out of range for {path:?} ({body} byte body)")]
    RewriteOutOfRange {
        /// Destination path being materialized
        path: PathBuf,
        /// Offending offset
        offset: u64,
        /// Decompressed body length
        body: u64,
    },

    /// The patch byte string does not match the recorded seek length
    #[error("rewrite length mismatch: seek was {seek} bytes, patch is {patch} bytes")]
    RewriteLengthMismatch {
        /// Length of the seek string recorded at ingest
        seek: usize,
        /// Length of the patch bytes supplied for restore
        patch: usize,
    },

    /// Library directory exists but is not a hololib
    #[error("library not initialized at {0:?}")]
    LibraryNotInitialized(PathBuf),

    /// Corruption detected in the library or a catalog
    #[error("corruption detected: {0}")]
    Corrupted(String),

    /// Worker pool construction or scheduling error
    #[error("worker pool error: {0}")]
    Pool(String),

    /// Generic error for unexpected conditions
    #[error("internal error: {0}")]
    Internal(String),
}

impl HoloError {
    /// Create a path-tagged I/O error
    pub fn path_io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HoloError::PathIo {
            action,
            path: path.into(),
            source,
        }
    }

    /// Create a corruption error with a custom message
    pub fn corrupted(msg: impl Into<String>) -> Self {
        HoloError::Corrupted(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        HoloError::Internal(msg.into())
    }

    /// Check if this error indicates content missing from the library
    pub fn is_missing_content(&self) -> bool {
        matches!(self, HoloError::MissingContent { .. })
    }
}
