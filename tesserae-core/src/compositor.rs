//! Blending a processed tile back into the running output image.

use crate::error::{MaskError, MaskResult};
use crate::image::Image;
use crate::mask::Mask;
use crate::tile::Tile;
use rayon::prelude::*;

/// Pastes `processed` into `image` at `tile`'s coordinates (optionally
/// scaled, for previewer use), blended against the existing pixels by
/// `mask * blend`.
///
/// When `mask` is `None` the tile is pasted opaquely. When the mask's pixel
/// dimensions disagree with the tile's scaled dimensions it is bilinearly
/// resampled first.
pub fn put(
    image: &mut Image,
    tile: &Tile,
    processed: &Image,
    mask: Option<&Mask>,
    blend: f32,
    scale: f32,
) -> MaskResult<()> {
    let dst_x = (tile.w_span.0 as f32 * scale).round() as u32;
    let dst_y = (tile.h_span.0 as f32 * scale).round() as u32;
    let dst_w = processed.width();
    let dst_h = processed.height();

    let resampled_mask;
    let weights: Option<&[f32]> = match mask {
        None => None,
        Some(m) if m.width() == dst_w && m.height() == dst_h => Some(m.data()),
        Some(m) => {
            let rebuilt = resample_mask(m, dst_w, dst_h)?;
            resampled_mask = rebuilt;
            Some(&resampled_mask)
        }
    };

    let ch = image.channels() as usize;
    let img_width = image.width();
    let stride = img_width as usize * ch;
    let buf = image.data_mut();

    buf.par_chunks_mut(stride)
        .enumerate()
        .skip(dst_y as usize)
        .take(dst_h as usize)
        .for_each(|(iy, row)| {
            let y = iy as u32 - dst_y;
            for x in 0..dst_w {
                let ix = dst_x + x;
                if ix >= img_width {
                    continue;
                }
                let weight = weights
                    .map(|w| w[(y * dst_w + x) as usize] * blend)
                    .unwrap_or(blend);
                let src = processed.pixel(x, y);
                let off = ix as usize * ch;
                for c in 0..ch {
                    row[off + c] = src[c] * weight + row[off + c] * (1.0 - weight);
                }
            }
        });
    Ok(())
}

fn resample_mask(mask: &Mask, width: u32, height: u32) -> MaskResult<Vec<f32>> {
    if mask.width() == 0 || mask.height() == 0 || width == 0 || height == 0 {
        return Err(MaskError::ShapeMismatch {
            mw: mask.width(),
            mh: mask.height(),
            tw: width,
            th: height,
        });
    }
    let mut out = vec![0.0f32; (width * height) as usize];
    let scale_x = mask.width() as f32 / width as f32;
    let scale_y = mask.height() as f32 / height as f32;
    for y in 0..height {
        let sy = ((y as f32 + 0.5) * scale_y).min(mask.height() as f32 - 1.0) as u32;
        for x in 0..width {
            let sx = ((x as f32 + 0.5) * scale_x).min(mask.width() as f32 - 1.0) as u32;
            out[(y * width + x) as usize] = mask.at(sx, sy);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::MaskBuilder;

    #[test]
    fn opaque_paste_replaces_region() {
        let mut image = Image::new(8, 8, 1).unwrap();
        let processed = Image::from_vec(vec![1.0; 4 * 4], 4, 4, 1).unwrap();
        let tile = Tile::new((0, 4), (0, 4), 0, 0, 1, 1);
        put(&mut image, &tile, &processed, None, 1.0, 1.0).unwrap();
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(image.pixel(x, y)[0], 1.0);
            }
        }
        assert_eq!(image.pixel(5, 5)[0], 0.0);
    }

    #[test]
    fn full_mask_is_idempotent_with_ones() {
        let builder = MaskBuilder::new(0, 0);
        let mask = builder.build(4, 4).unwrap();
        let mut image = Image::new(4, 4, 1).unwrap();
        let processed = Image::from_vec(vec![0.5; 16], 4, 4, 1).unwrap();
        let tile = Tile::new((0, 4), (0, 4), 0, 0, 0, 0);
        put(&mut image, &tile, &processed, Some(&mask), 1.0, 1.0).unwrap();
        assert!(image.data().iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }
}
