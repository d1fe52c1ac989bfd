//! Feather mask construction and border edge-fixing.

use crate::error::{MaskError, MaskResult};
use crate::tile::{Edge, Tile};

/// Builds symmetric feather masks of a fixed padding/feather configuration.
#[derive(Debug, Clone, Copy)]
pub struct MaskBuilder {
    /// Width of the hard-zero border on every side, in pixels.
    pub padding: u32,
    /// Width of the linear feather ramp following the border, in pixels.
    pub feather: u32,
}

impl MaskBuilder {
    /// Creates a builder with the given padding and feather widths.
    pub fn new(padding: u32, feather: u32) -> Self {
        Self { padding, feather }
    }

    /// Builds a mask for a tile of the given pixel dimensions.
    ///
    /// Construction: a quarter-sized grid of ones has its first `padding`
    /// rows/columns zeroed, the next `feather` rows/columns ramped linearly
    /// from `0` to `1`, and is then mirrored vertically then horizontally to
    /// rebuild the full mask.
    pub fn build(&self, width: u32, height: u32) -> MaskResult<Mask> {
        if width % 2 != 0 || height % 2 != 0 {
            return Err(MaskError::OddShape { width, height });
        }
        let half_w = width / 2;
        let half_h = height / 2;
        let half = half_w.min(half_h);
        if self.padding + self.feather > half {
            return Err(MaskError::RampTooWide {
                padding: self.padding,
                feather: self.feather,
                half,
            });
        }

        let mut quarter = vec![1.0f32; (half_w * half_h) as usize];
        let ramp = |k: u32, padding: u32, feather: u32| -> f32 {
            if k < padding {
                0.0
            } else if k < padding + feather {
                (k - padding + 1) as f32 / feather.max(1) as f32
            } else {
                1.0
            }
        };
        for y in 0..half_h {
            let row_weight = ramp(y, self.padding, self.feather);
            for x in 0..half_w {
                let col_weight = ramp(x, self.padding, self.feather);
                quarter[(y * half_w + x) as usize] = row_weight * col_weight;
            }
        }

        let mut full = vec![0.0f32; (width * height) as usize];
        for y in 0..height {
            let qy = if y < half_h { half_h - 1 - y } else { y - half_h };
            for x in 0..width {
                let qx = if x < half_w { half_w - 1 - x } else { x - half_w };
                full[(y * width + x) as usize] = quarter[(qy * half_w + qx) as usize];
            }
        }

        Ok(Mask { width, height, data: full })
    }
}

/// A single-channel blending weight grid in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl Mask {
    /// Mask width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Mask height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Flat row-major weight buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Weight at `(x, y)`.
    pub fn at(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    /// Extends feathering to full opacity on any edge the tile touches the
    /// image boundary, by copying the mask's center row/column into the
    /// outer half of the affected edge.
    pub fn fix_edge(&mut self, tile: &Tile) {
        let h_com = self.height / 2;
        let w_com = self.width / 2;

        if tile.is_edge(Edge::HStart) {
            for y in 0..h_com {
                for x in 0..self.width {
                    self.data[(y * self.width + x) as usize] = self.data[(h_com * self.width + x) as usize];
                }
            }
        }
        if tile.is_edge(Edge::HEnd) {
            for y in h_com..self.height {
                for x in 0..self.width {
                    self.data[(y * self.width + x) as usize] =
                        self.data[((h_com.saturating_sub(1)) * self.width + x) as usize];
                }
            }
        }
        if tile.is_edge(Edge::WStart) {
            for x in 0..w_com {
                for y in 0..self.height {
                    self.data[(y * self.width + x) as usize] = self.data[(y * self.width + w_com) as usize];
                }
            }
        }
        if tile.is_edge(Edge::WEnd) {
            for x in w_com..self.width {
                for y in 0..self.height {
                    self.data[(y * self.width + x) as usize] =
                        self.data[(y * self.width + w_com.saturating_sub(1)) as usize];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_is_symmetric() {
        let builder = MaskBuilder::new(4, 8);
        let mask = builder.build(64, 64).unwrap();
        for y in 0..64 {
            for x in 0..64 {
                assert_eq!(mask.at(x, y), mask.at(63 - x, y));
                assert_eq!(mask.at(x, y), mask.at(x, 63 - y));
            }
        }
    }

    #[test]
    fn mask_border_is_zero() {
        let builder = MaskBuilder::new(4, 8);
        let mask = builder.build(64, 64).unwrap();
        for x in 0..64 {
            assert_eq!(mask.at(x, 0), 0.0);
        }
    }

    #[test]
    fn mask_center_is_one() {
        let builder = MaskBuilder::new(4, 8);
        let mask = builder.build(64, 64).unwrap();
        assert_eq!(mask.at(32, 32), 1.0);
    }

    #[test]
    fn fix_edge_extends_opacity_to_full_on_boundary() {
        let builder = MaskBuilder::new(4, 8);
        let mut mask = builder.build(64, 64).unwrap();
        let tile = Tile::new((0, 64), (0, 64), 0, 0, 0, 0);
        mask.fix_edge(&tile);
        // a single-tile grid touches all four edges; result should be all-ones
        for y in 0..64 {
            for x in 0..64 {
                assert_eq!(mask.at(x, y), 1.0);
            }
        }
    }

    #[test]
    fn odd_shape_rejected() {
        let builder = MaskBuilder::new(4, 8);
        assert!(builder.build(63, 64).is_err());
    }
}
