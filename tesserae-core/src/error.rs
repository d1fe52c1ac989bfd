//! Error types for tile geometry and mask construction.

use thiserror::Error;

/// Result type alias using [`GeometryError`].
pub type GeometryResult<T> = std::result::Result<T, GeometryError>;

/// Errors raised while building a slicer or querying tile geometry.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// `size` must be smaller than the axis it tiles.
    #[error("tile size {size} is not smaller than dimension {dim}")]
    SizeTooLarge {
        /// Requested tile size
        size: u32,
        /// Axis dimension
        dim: u32,
    },

    /// Overlap must be smaller than the tile size, otherwise segments never advance.
    #[error("overlap {overlap} is not smaller than tile size {size}")]
    OverlapTooLarge {
        /// Requested overlap
        overlap: u32,
        /// Tile size
        size: u32,
    },

    /// Coordinates passed to `get_tile_at` are outside the slicer's grid.
    #[error("tile coordinate ({h}, {w}) outside grid {h_max}x{w_max}")]
    TileOutOfRange {
        /// Row index
        h: u32,
        /// Column index
        w: u32,
        /// Maximum row index
        h_max: u32,
        /// Maximum column index
        w_max: u32,
    },

    /// The source image has a zero dimension.
    #[error("image has invalid dimensions {width}x{height}")]
    InvalidImage {
        /// Image width
        width: u32,
        /// Image height
        height: u32,
    },
}

/// Result type alias using [`MaskError`].
pub type MaskResult<T> = std::result::Result<T, MaskError>;

/// Errors raised while building or applying a feather mask.
#[derive(Debug, Error)]
pub enum MaskError {
    /// The mask builder requires even tile dimensions so it can mirror a quarter grid.
    #[error("mask shape {width}x{height} must have even width and height")]
    OddShape {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
    },

    /// `padding + feather` must not exceed half the mask's shortest axis.
    #[error("padding {padding} + feather {feather} exceeds half-extent {half}")]
    RampTooWide {
        /// Configured padding
        padding: u32,
        /// Configured feather width
        feather: u32,
        /// Half of the shortest mask axis
        half: u32,
    },

    /// A mask was asked to composite against a tile of a different shape with no
    /// resample path available (zero-sized source or destination).
    #[error("cannot resample mask {mw}x{mh} onto tile {tw}x{th}")]
    ShapeMismatch {
        /// Mask width
        mw: u32,
        /// Mask height
        mh: u32,
        /// Tile width
        tw: u32,
        /// Tile height
        th: u32,
    },
}
