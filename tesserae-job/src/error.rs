//! Error types for job construction, dispatch and the registry.

use thiserror::Error;

/// Result type alias using [`JobError`].
pub type JobResult<T> = std::result::Result<T, JobError>;

/// Errors raised while constructing or running a tiled upscale job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Settings carried no workflow graph to submit to workers.
    #[error("settings have no workflow graph")]
    MissingWorkflow,

    /// A job was constructed with an empty worker roster.
    #[error("no workers configured")]
    NoWorkers,

    /// The registry already has a job running.
    #[error("a job is already running")]
    Busy,

    /// No job is currently running.
    #[error("no active job")]
    NoActiveJob,

    /// Bad slicer configuration.
    #[error(transparent)]
    Geometry(#[from] tesserae_core::GeometryError),

    /// Bad mask configuration.
    #[error(transparent)]
    Mask(#[from] tesserae_core::MaskError),

    /// Failed to write the assembled output image.
    #[error(transparent)]
    Io(#[from] tesserae_io::IoError),
}
