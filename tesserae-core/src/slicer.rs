//! Tile geometry and dependency-aware dispatch ordering.
//!
//! Three strategies segment an image axis into overlapping spans and decide,
//! given the current state of every tile, which ones are safe to dispatch
//! right now. The strategies differ only in `build_dim_segs` (how spans are
//! laid out) and `ready_tiles` (which dependency graph governs dispatch
//! order); the tile-list construction and neighbour lookup are shared here.

use crate::error::{GeometryError, GeometryResult};
use crate::tile::{Edge, Span, Tile};

/// Produces a tile grid from an image size and answers "which tiles can be
/// dispatched right now".
pub trait Slicer: Send + Sync {
    /// All tiles in the grid, in construction order.
    fn tiles(&self) -> &[Tile];

    /// Mutable access, used by the job controller to flip `done`/`proc`.
    fn tiles_mut(&mut self) -> &mut [Tile];

    /// Tiles eligible for dispatch given the current state of `tiles()`.
    /// Returned in the grid's natural order; callers may assign workers to
    /// them in any order.
    fn ready_tiles(&self) -> Vec<usize>;

    /// `true` once every tile is `done`.
    fn finished(&self) -> bool {
        self.tiles().iter().all(|t| t.done)
    }

    /// Linear lookup of the tile at grid position `(h, w)`.
    fn tile_at(&self, h: u32, w: u32) -> Option<usize> {
        self.tiles().iter().position(|t| t.h_id == h && t.w_id == w)
    }
}

/// Builds the Cartesian product of row/column spans into a flat tile list.
fn build_tile_list(h_segs: &[Span], w_segs: &[Span]) -> Vec<Tile> {
    let h_max = (h_segs.len() as u32).saturating_sub(1);
    let w_max = (w_segs.len() as u32).saturating_sub(1);
    let mut tiles = Vec::with_capacity(h_segs.len() * w_segs.len());
    for (h_id, &h_span) in h_segs.iter().enumerate() {
        for (w_id, &w_span) in w_segs.iter().enumerate() {
            tiles.push(Tile::new(h_span, w_span, h_id as u32, w_id as u32, h_max, w_max));
        }
    }
    tiles
}

fn check_params(size: u32, overlap: u32, dim: u32) -> GeometryResult<()> {
    if size >= dim {
        return Err(GeometryError::SizeTooLarge { size, dim });
    }
    if overlap >= size {
        return Err(GeometryError::OverlapTooLarge { overlap, size });
    }
    Ok(())
}

/// Fixed tile size with constant overlap; an 8-neighbour exclusion policy
/// allows a checkerboard-like amount of parallelism.
pub struct SimpleSlicer {
    tiles: Vec<Tile>,
}

impl SimpleSlicer {
    /// Builds a grid covering `width`x`height` with the given `size` and
    /// `overlap`. When `uniform` is true every tile is forced to exactly
    /// `size` pixels (the last span is anchored to the far edge instead of
    /// being shrunk).
    pub fn new(width: u32, height: u32, size: u32, overlap: u32, uniform: bool) -> GeometryResult<Self> {
        check_params(size, overlap, width)?;
        check_params(size, overlap, height)?;
        let h_segs = build_dim_segs(height, size, overlap, uniform);
        let w_segs = build_dim_segs(width, size, overlap, uniform);
        Ok(Self {
            tiles: build_tile_list(&h_segs, &w_segs),
        })
    }
}

fn build_dim_segs(dim: u32, size: u32, overlap: u32, uniform: bool) -> Vec<Span> {
    let mut segs = vec![(0u32, size.min(dim))];
    loop {
        let prev_end = segs.last().unwrap().1;
        if prev_end >= dim {
            break;
        }
        let mut start = prev_end.saturating_sub(overlap);
        let mut end = prev_end + size - overlap;
        if !uniform && (end as f32 + size as f32 * 0.3) > dim as f32 {
            end = dim;
        }
        if uniform && end >= dim {
            start = dim.saturating_sub(size);
            end = dim;
        }
        start = start.min(dim);
        end = end.min(dim);
        if end <= start {
            break;
        }
        segs.push((start, end));
        if end >= dim {
            break;
        }
    }
    segs
}

/// `true` if `a` and `b` are 8-neighbours (including diagonals) on the tile grid.
fn is_neighbour(a: &Tile, b: &Tile) -> bool {
    let dh = (a.h_id as i64 - b.h_id as i64).abs();
    let dw = (a.w_id as i64 - b.w_id as i64).abs();
    dh <= 1 && dw <= 1 && !(dh == 0 && dw == 0)
}

impl Slicer for SimpleSlicer {
    fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    fn tiles_mut(&mut self) -> &mut [Tile] {
        &mut self.tiles
    }

    fn ready_tiles(&self) -> Vec<usize> {
        let mut batch: Vec<usize> = Vec::new();
        for (i, tile) in self.tiles.iter().enumerate() {
            if tile.done || tile.proc {
                continue;
            }
            let conflicts = self.tiles.iter().enumerate().any(|(j, other)| {
                if !is_neighbour(tile, other) {
                    return false;
                }
                other.proc || batch.contains(&j)
            });
            if !conflicts {
                batch.push(i);
            }
        }
        batch
    }
}

/// Ultimate-SD-Upscale-style slicer: strictly serial, one tile in flight.
pub struct UsdusSlicer {
    tiles: Vec<Tile>,
}

impl UsdusSlicer {
    /// Builds a grid with a larger initial span and a two-overlap retreat
    /// between successive tiles, matching the original tool's boundary
    /// handling.
    pub fn new(width: u32, height: u32, size: u32, overlap: u32, uniform: bool) -> GeometryResult<Self> {
        check_params(size, overlap, width)?;
        check_params(size, overlap, height)?;
        let h_segs = build_usdus_segs(height, size, overlap, uniform);
        let w_segs = build_usdus_segs(width, size, overlap, uniform);
        Ok(Self {
            tiles: build_tile_list(&h_segs, &w_segs),
        })
    }
}

fn build_usdus_segs(dim: u32, size: u32, overlap: u32, uniform: bool) -> Vec<Span> {
    let mut segs = vec![(0u32, (size + overlap).min(dim))];
    loop {
        let prev_end = segs.last().unwrap().1;
        if prev_end >= dim {
            break;
        }
        let mut start = prev_end.saturating_sub(2 * overlap);
        let mut end = if uniform {
            prev_end + size - overlap
        } else {
            prev_end + size
        };
        if uniform && end >= dim {
            start = dim.saturating_sub(size + overlap);
            end = dim;
        }
        start = start.min(dim);
        end = end.min(dim);
        if end <= start {
            break;
        }
        segs.push((start, end));
        if end >= dim {
            break;
        }
    }
    segs
}

impl Slicer for UsdusSlicer {
    fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    fn tiles_mut(&mut self) -> &mut [Tile] {
        &mut self.tiles
    }

    fn ready_tiles(&self) -> Vec<usize> {
        if self.tiles.iter().any(|t| t.proc) {
            return Vec::new();
        }
        match self.tiles.iter().position(|t| !t.done) {
            Some(i) => vec![i],
            None => Vec::new(),
        }
    }
}

/// Half-overlap slicer producing a diagonal wavefront of dependencies.
pub struct NyanTileSlicer {
    tiles: Vec<Tile>,
}

impl NyanTileSlicer {
    /// Builds a grid with half-tile-sized steps between successive spans.
    pub fn new(width: u32, height: u32, size: u32, uniform: bool) -> GeometryResult<Self> {
        check_params(size, 0, width)?;
        check_params(size, 0, height)?;
        let h_segs = build_nyan_segs(height, size, uniform);
        let w_segs = build_nyan_segs(width, size, uniform);
        Ok(Self {
            tiles: build_tile_list(&h_segs, &w_segs),
        })
    }
}

fn build_nyan_segs(dim: u32, size: u32, uniform: bool) -> Vec<Span> {
    let mut segs = vec![(0u32, size.min(dim))];
    loop {
        let prev_end = segs.last().unwrap().1;
        if prev_end >= dim {
            break;
        }
        let half = size / 2;
        let mut start = prev_end.saturating_sub(half);
        let mut end = prev_end + half;
        if !uniform && (prev_end as f32 + size as f32 * 0.75) > dim as f32 {
            end = dim;
        }
        if uniform && (prev_end as f32 + size as f32 * 0.5) > dim as f32 {
            start = dim.saturating_sub(size);
            end = dim;
        }
        start = start.min(dim);
        end = end.min(dim);
        if end <= start {
            break;
        }
        segs.push((start, end));
        if end >= dim {
            break;
        }
    }
    segs
}

impl Slicer for NyanTileSlicer {
    fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    fn tiles_mut(&mut self) -> &mut [Tile] {
        &mut self.tiles
    }

    fn ready_tiles(&self) -> Vec<usize> {
        let mut batch: Vec<usize> = Vec::new();
        for (i, tile) in self.tiles.iter().enumerate() {
            if tile.done || tile.proc {
                continue;
            }
            if tile.h_id == 0 && tile.w_id == 0 {
                batch.push(i);
                continue;
            }
            let above = self.tile_at(tile.h_id.wrapping_sub(1), tile.w_id);
            let left = if tile.w_id == 0 { None } else { self.tile_at(tile.h_id, tile.w_id - 1) };
            // The diagonal up-right predecessor is only consulted away from
            // the grid's right edge: there is no tile to wait on past it.
            let diag = if tile.h_id >= 1 && !tile.is_edge(Edge::WEnd) {
                self.tile_at(tile.h_id - 1, tile.w_id + 1)
            } else {
                None
            };

            let dep_ready = |idx: Option<usize>| match idx {
                None => true,
                Some(j) => self.tiles[j].done && !batch.contains(&j),
            };

            if dep_ready(above) && dep_ready(left) && dep_ready(diag) {
                batch.push(i);
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_segments_cover_dimension() {
        let segs = build_dim_segs(1024, 512, 64, false);
        assert_eq!(segs[0].0, 0);
        assert_eq!(segs.last().unwrap().1, 1024);
        for w in segs.windows(2) {
            assert!(w[1].0 < w[0].1, "segments must overlap");
        }
    }

    #[test]
    fn usdus_is_strictly_serial() {
        let slicer = UsdusSlicer::new(1024, 1024, 768, 64, false).unwrap();
        assert_eq!(slicer.tiles().len(), 4);
        let ready = slicer.ready_tiles();
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn usdus_blocks_while_any_tile_in_flight() {
        let mut slicer = UsdusSlicer::new(1024, 1024, 768, 64, false).unwrap();
        slicer.tiles_mut()[0].proc = true;
        assert!(slicer.ready_tiles().is_empty());
    }

    #[test]
    fn nyan_origin_always_ready() {
        let slicer = NyanTileSlicer::new(1536, 1536, 768, false).unwrap();
        let ready = slicer.ready_tiles();
        assert!(ready.contains(&slicer.tile_at(0, 0).unwrap()));
    }

    #[test]
    fn nyan_waits_on_predecessors() {
        let mut slicer = NyanTileSlicer::new(1536, 1536, 768, false).unwrap();
        // Mark origin done; (0,1) and (1,0) should now be dispatchable, but
        // (1,1) must wait on all three predecessors.
        let origin = slicer.tile_at(0, 0).unwrap();
        slicer.tiles_mut()[origin].done = true;
        let ready = slicer.ready_tiles();
        if let Some(idx11) = slicer.tile_at(1, 1) {
            assert!(!ready.contains(&idx11));
        }
    }

    #[test]
    fn simple_excludes_proc_neighbours() {
        let mut slicer = SimpleSlicer::new(2048, 1024, 512, 64, false).unwrap();
        let center = slicer.tile_at(1, 1).unwrap();
        slicer.tiles_mut()[center].proc = true;
        let ready = slicer.ready_tiles();
        for &i in &ready {
            let t = &slicer.tiles()[i];
            assert!(!is_neighbour(t, &slicer.tiles()[center]) || i == center);
        }
    }

    #[test]
    fn rejects_size_not_smaller_than_dim() {
        assert!(SimpleSlicer::new(512, 512, 512, 64, false).is_err());
    }
}
