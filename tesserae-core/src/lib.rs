//! Core geometry types for tiled image upscaling: tiles, slicer strategies,
//! feather masks, and the compositor that blends processed tiles back into
//! a running output image.

#![warn(missing_docs)]

mod compositor;
mod error;
mod image;
mod mask;
mod rect;
mod slicer;
mod tile;

pub use compositor::put;
pub use error::{GeometryError, GeometryResult, MaskError, MaskResult};
pub use image::Image;
pub use mask::{Mask, MaskBuilder};
pub use rect::Rect;
pub use slicer::{NyanTileSlicer, Slicer, SimpleSlicer, UsdusSlicer};
pub use tile::{Edge, Span, Tile};

/// Frequently used re-exports.
pub mod prelude {
    pub use crate::{
        Edge, GeometryError, GeometryResult, Image, Mask, MaskBuilder, MaskError, MaskResult, Rect,
        Slicer, Span, Tile,
    };
}
