//! A plain floating-point pixel buffer used throughout the tiling pipeline.
//!
//! Unlike a general-purpose VFX image type, tiles here carry no color-space
//! or transfer-function information: the orchestrator never interprets pixel
//! values, it only crops, blends and pastes them. Channels are always packed
//! row-major as `[R, G, B, (A)]` floats in `[0, 1]`.

use crate::error::{GeometryError, GeometryResult};
use crate::rect::Rect;
use std::sync::Arc;

/// A row-major floating point image buffer shared by `Arc` so tiles can be
/// cropped out of a running image without copying the whole thing more than
/// once per crop.
#[derive(Debug, Clone)]
pub struct Image {
    data: Arc<Vec<f32>>,
    width: u32,
    height: u32,
    channels: u8,
}

impl Image {
    /// Allocates a new zero-filled image.
    pub fn new(width: u32, height: u32, channels: u8) -> GeometryResult<Self> {
        if width == 0 || height == 0 {
            return Err(GeometryError::InvalidImage { width, height });
        }
        let len = width as usize * height as usize * channels as usize;
        Ok(Self {
            data: Arc::new(vec![0.0; len]),
            width,
            height,
            channels,
        })
    }

    /// Wraps an existing buffer. `data.len()` must equal `width*height*channels`.
    pub fn from_vec(data: Vec<f32>, width: u32, height: u32, channels: u8) -> GeometryResult<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected || width == 0 || height == 0 {
            return Err(GeometryError::InvalidImage { width, height });
        }
        Ok(Self {
            data: Arc::new(data),
            width,
            height,
            channels,
        })
    }

    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of channels per pixel.
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Bounds of the whole image as a [`Rect`].
    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    /// Read-only access to the packed pixel buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Index of the first channel of pixel `(x, y)`.
    #[inline]
    fn pixel_index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels as usize
    }

    /// Returns the channel values at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        let i = self.pixel_index(x, y);
        &self.data[i..i + self.channels as usize]
    }

    /// Crops a sub-rectangle into a new owned [`Image`].
    pub fn crop(&self, rect: Rect) -> GeometryResult<Image> {
        let rect = rect
            .clamp_to(self.width, self.height)
            .ok_or(GeometryError::InvalidImage {
                width: rect.width,
                height: rect.height,
            })?;
        let ch = self.channels as usize;
        let mut out = Vec::with_capacity(rect.width as usize * rect.height as usize * ch);
        for y in rect.y..rect.bottom() {
            let row_start = self.pixel_index(rect.x, y);
            let row_end = row_start + rect.width as usize * ch;
            out.extend_from_slice(&self.data[row_start..row_end]);
        }
        Image::from_vec(out, rect.width, rect.height, self.channels)
    }

    /// Returns a mutable buffer view for in-place pasting. Copy-on-write via
    /// `Arc::make_mut`: cheap when this image has no other live clones (the
    /// running output image during assembly), otherwise clones first.
    pub fn data_mut(&mut self) -> &mut Vec<f32> {
        Arc::make_mut(&mut self.data)
    }

    /// Nearest-neighbour resize, used by the previewer to downscale the
    /// running image and to upscale a processed tile before composing it
    /// into the lower-resolution preview.
    pub fn resize_nearest(&self, new_width: u32, new_height: u32) -> GeometryResult<Image> {
        if new_width == 0 || new_height == 0 {
            return Err(GeometryError::InvalidImage {
                width: new_width,
                height: new_height,
            });
        }
        let ch = self.channels as usize;
        let mut out = vec![0.0f32; new_width as usize * new_height as usize * ch];
        for y in 0..new_height {
            let sy = (y as u64 * self.height as u64 / new_height as u64) as u32;
            for x in 0..new_width {
                let sx = (x as u64 * self.width as u64 / new_width as u64) as u32;
                let src = self.pixel_index(sx, sy);
                let dst = (y as usize * new_width as usize + x as usize) * ch;
                out[dst..dst + ch].copy_from_slice(&self.data[src..src + ch]);
            }
        }
        Image::from_vec(out, new_width, new_height, self.channels)
    }

    /// Bilinear resize, used when downscaling a tile before upload per the
    /// worker's `upscale_factor` setting and when a mask needs resampling to
    /// a tile's actual pixel dimensions.
    pub fn resize_bilinear(&self, new_width: u32, new_height: u32) -> GeometryResult<Image> {
        if new_width == 0 || new_height == 0 {
            return Err(GeometryError::InvalidImage {
                width: new_width,
                height: new_height,
            });
        }
        let ch = self.channels as usize;
        let mut out = vec![0.0f32; new_width as usize * new_height as usize * ch];
        let scale_x = self.width as f32 / new_width as f32;
        let scale_y = self.height as f32 / new_height as f32;
        for y in 0..new_height {
            let fy = ((y as f32 + 0.5) * scale_y - 0.5).max(0.0);
            let y0 = fy.floor() as u32;
            let y1 = (y0 + 1).min(self.height - 1);
            let ty = fy - y0 as f32;
            for x in 0..new_width {
                let fx = ((x as f32 + 0.5) * scale_x - 0.5).max(0.0);
                let x0 = fx.floor() as u32;
                let x1 = (x0 + 1).min(self.width - 1);
                let tx = fx - x0 as f32;

                let p00 = self.pixel(x0, y0);
                let p10 = self.pixel(x1, y0);
                let p01 = self.pixel(x0, y1);
                let p11 = self.pixel(x1, y1);

                let dst = (y as usize * new_width as usize + x as usize) * ch;
                for c in 0..ch {
                    let top = p00[c] * (1.0 - tx) + p10[c] * tx;
                    let bottom = p01[c] * (1.0 - tx) + p11[c] * tx;
                    out[dst + c] = top * (1.0 - ty) + bottom * ty;
                }
            }
        }
        Image::from_vec(out, new_width, new_height, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_allocates_zeroed() {
        let img = Image::new(4, 4, 3).unwrap();
        assert_eq!(img.data().len(), 4 * 4 * 3);
        assert!(img.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn crop_extracts_subregion() {
        let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let img = Image::from_vec(data, 4, 4, 1).unwrap();
        let cropped = img.crop(Rect::new(1, 1, 2, 2)).unwrap();
        assert_eq!(cropped.data(), &[5.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn invalid_dims_rejected() {
        assert!(Image::new(0, 4, 3).is_err());
    }
}
