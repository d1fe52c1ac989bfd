//! A single rectangular work item within a tiled upscale job.

use crate::rect::Rect;

/// A horizontal or vertical span `[start, end)` along one image axis.
pub type Span = (u32, u32);

/// One rectangular region of the source image, tracked through its
/// dispatch/assembly lifecycle.
///
/// # Invariants
///
/// - `done` and `proc` are never both `true`.
/// - `worker` is `Some` iff `proc` is `true`.
#[derive(Debug, Clone)]
pub struct Tile {
    /// Row index in the tile grid.
    pub h_id: u32,
    /// Column index in the tile grid.
    pub w_id: u32,
    /// Largest valid row index in the grid (`rows - 1`).
    pub h_max: u32,
    /// Largest valid column index in the grid (`cols - 1`).
    pub w_max: u32,
    /// Vertical pixel span `(h_start, h_end)`.
    pub h_span: Span,
    /// Horizontal pixel span `(w_start, w_end)`.
    pub w_span: Span,
    /// Set once the tile has been composited into the output image.
    pub done: bool,
    /// Set while the tile is dispatched to a worker and not yet assembled.
    pub proc: bool,
    /// Identifier of the worker currently processing this tile, if any.
    pub worker: Option<String>,
}

/// The four named edges of the tile grid, used by [`Tile::is_edge`] and mask
/// edge extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Top row of the grid (`h_id == 0`).
    HStart,
    /// Bottom row of the grid (`h_id == h_max`).
    HEnd,
    /// Left column of the grid (`w_id == 0`).
    WStart,
    /// Right column of the grid (`w_id == w_max`).
    WEnd,
}

impl Tile {
    /// Builds a new tile at grid position `(h_id, w_id)` spanning the given
    /// pixel ranges. Panics if the id exceeds the grid bounds — callers are
    /// always the slicer's own tile-list builder, which never does this.
    pub fn new(h_span: Span, w_span: Span, h_id: u32, w_id: u32, h_max: u32, w_max: u32) -> Self {
        assert!(h_id <= h_max && w_id <= w_max, "tile id outside grid");
        Self {
            h_id,
            w_id,
            h_max,
            w_max,
            h_span,
            w_span,
            done: false,
            proc: false,
            worker: None,
        }
    }

    /// Returns `true` if this tile sits on the named grid edge.
    pub fn is_edge(&self, edge: Edge) -> bool {
        match edge {
            Edge::HStart => self.h_id == 0,
            Edge::HEnd => self.h_id == self.h_max,
            Edge::WStart => self.w_id == 0,
            Edge::WEnd => self.w_id == self.w_max,
        }
    }

    /// This tile's pixel bounds as a [`Rect`].
    pub fn rect(&self) -> Rect {
        Rect::new(
            self.w_span.0,
            self.h_span.0,
            self.w_span.1 - self.w_span.0,
            self.h_span.1 - self.h_span.0,
        )
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.w_span.1 - self.w_span.0
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.h_span.1 - self.h_span.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_detected() {
        let t = Tile::new((0, 10), (0, 10), 0, 2, 3, 2);
        assert!(t.is_edge(Edge::HStart));
        assert!(!t.is_edge(Edge::HEnd));
        assert!(t.is_edge(Edge::WEnd));
    }

    #[test]
    fn rect_matches_spans() {
        let t = Tile::new((5, 15), (20, 40), 1, 2, 3, 4);
        let r = t.rect();
        assert_eq!((r.x, r.y, r.width, r.height), (20, 5, 20, 10));
    }
}
