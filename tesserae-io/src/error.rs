//! Error types for path management, PNG output and workflow hand-through.

use thiserror::Error;

/// Result type alias using [`IoError`].
pub type IoResult<T> = std::result::Result<T, IoError>;

/// Errors raised by this crate's file and graph operations.
#[derive(Debug, Error)]
pub enum IoError {
    /// Wraps [`std::io::Error`] for file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// PNG decode failure.
    #[error("PNG decode error: {0}")]
    Decode(String),

    /// PNG encode failure.
    #[error("PNG encode error: {0}")]
    Encode(String),

    /// A path resolved outside its configured base directory.
    #[error("path {path} escapes base directory {base}")]
    PathEscape {
        /// Offending path
        path: String,
        /// Base directory it should have stayed within
        base: String,
    },

    /// Referenced a path mode (`input`/`output`/`temp`/`prompt`) that was never configured.
    #[error("unknown path mode: {0}")]
    UnknownMode(String),

    /// File extension not in the caller's allow-list.
    #[error("extension {found:?} not allowed, expected one of {allowed:?}")]
    BadExtension {
        /// Extension found on the path, if any
        found: Option<String>,
        /// Allowed extensions
        allowed: Vec<String>,
    },

    /// The destination file already exists and overwriting was not requested.
    #[error("file already exists: {0}")]
    AlreadyExists(String),

    /// A workflow graph transform expected a node that was not present.
    #[error("workflow node not found: {0}")]
    NodeNotFound(String),

    /// The settings payload could not be serialized to JSON for embedding.
    #[error("failed to serialize metadata: {0}")]
    MetaSerialize(#[from] serde_json::Error),
}
