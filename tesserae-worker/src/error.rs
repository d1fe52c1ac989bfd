//! Error types for the worker proxy's state machine and HTTP protocol.

use thiserror::Error;

/// Result type alias using [`WorkerError`].
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// Errors raised while probing, dispatching to, or polling a remote worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker's local state did not allow the requested transition
    /// (e.g. `process()` called while not `idle`).
    #[error("worker in state {actual:?}, expected {expected:?}")]
    BadState {
        /// State required for the operation
        expected: &'static str,
        /// State actually observed
        actual: String,
    },

    /// A request to the worker's HTTP endpoint failed or timed out.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote history endpoint never produced a matching output within
    /// the polling deadline.
    #[error("shard timed out waiting for job {0}")]
    Timeout(String),

    /// Local state moved out of `proc` while a job was still in flight
    /// (an abort raced the poll loop).
    #[error("shard interrupted for job {0}")]
    Interrupted(String),

    /// The history entry for a finished job had no image under the
    /// expected (or any) output node.
    #[error("no output image found for job {0}")]
    MissingOutput(String),

    /// Image decode/encode failure while preparing an upload or parsing a
    /// downloaded result.
    #[error("image codec error: {0}")]
    Codec(#[from] tesserae_core::GeometryError),
}
