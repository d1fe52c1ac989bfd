//! Downscaled live-preview snapshot, overlaid with in-flight tile frames.

use crate::font;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tesserae_core::{put, GeometryResult, Image, Mask, Tile};

/// Chooses the previewer's downscale factor from the source image height:
/// full resolution up to 1024px tall, then progressively coarser.
fn preview_scale(height: u32) -> f32 {
    if height <= 1024 {
        1.0
    } else if height <= 2048 {
        0.5
    } else {
        0.25
    }
}

fn scaled_dims(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let w = ((width as f32) * scale).round().max(1.0) as u32;
    let h = ((height as f32) * scale).round().max(1.0) as u32;
    (w, h)
}

/// A downscaled copy of the running output image, refreshed from clean tile
/// pastes, with an overlay of in-flight tile frames rendered on demand.
///
/// `base` holds the clean composite (no overlay); `rendered` holds the last
/// overlay pass. Two monotonic tokens (`changed`/`updated`) let callers poll
/// cheaply for whether a fresh render is needed.
pub struct Previewer {
    scale: f32,
    base: Mutex<Image>,
    rendered: Mutex<Image>,
    changed: AtomicU64,
    updated: AtomicU64,
}

impl Previewer {
    /// Builds a previewer seeded from the job's starting image.
    pub fn new(source: &Image) -> GeometryResult<Self> {
        let scale = preview_scale(source.height());
        let (w, h) = scaled_dims(source.width(), source.height(), scale);
        let base = source.resize_nearest(w, h)?;
        let rendered = base.clone();
        Ok(Self {
            scale,
            base: Mutex::new(base),
            rendered: Mutex::new(rendered),
            changed: AtomicU64::new(1),
            updated: AtomicU64::new(0),
        })
    }

    /// The previewer's downscale factor relative to the source image.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Bumps the change token. Called by the dispatcher on every pacing tick
    /// and by the assembler after every composite.
    pub fn mark_change(&self) {
        self.changed.fetch_add(1, Ordering::SeqCst);
    }

    /// The token external callers poll to decide whether to re-fetch the
    /// preview image.
    pub fn changed_token(&self) -> u64 {
        self.changed.load(Ordering::SeqCst)
    }

    /// Pastes a nearest-neighbour-upscaled processed tile into the clean
    /// base snapshot, at the previewer's scale, using the same fixed mask
    /// the assembler composited with.
    pub fn update_tile(&self, tile: &Tile, processed: &Image, mask: Option<&Mask>) {
        let mut base = self.base.lock().unwrap();
        if let Err(e) = put(&mut base, tile, processed, mask, 1.0, self.scale) {
            tracing::warn!(error = %e, "previewer composite failed");
        }
    }

    /// Returns the latest overlay-rendered snapshot, lazily re-rendering
    /// only when the change token has moved since the last call.
    pub fn get_preview(&self, proc_tiles: &[Tile], done: bool) -> Image {
        let changed = self.changed.load(Ordering::SeqCst);
        let updated = self.updated.load(Ordering::SeqCst);
        if changed != updated {
            self.render(proc_tiles, done);
            self.updated.store(changed, Ordering::SeqCst);
        }
        self.rendered.lock().unwrap().clone()
    }

    fn render(&self, proc_tiles: &[Tile], done: bool) {
        let mut out = self.base.lock().unwrap().clone();
        for tile in proc_tiles {
            draw_tile_frame(&mut out, tile, self.scale);
            let label = tile.worker.as_deref().unwrap_or("?");
            font::draw_text(&mut out, label, frame_text_origin(tile, self.scale));
        }
        if !done {
            font::draw_text(&mut out, "PREVIEW", (4, 4));
        }
        *self.rendered.lock().unwrap() = out;
    }
}

/// Draws a translucent green rectangular outline around a proc tile's
/// scaled bounds.
fn draw_tile_frame(image: &mut Image, tile: &Tile, scale: f32) {
    let rect = tile.rect();
    let x0 = (rect.x as f32 * scale).round() as i64;
    let y0 = (rect.y as f32 * scale).round() as i64;
    let x1 = ((rect.x + rect.width) as f32 * scale).round() as i64;
    let y1 = ((rect.y + rect.height) as f32 * scale).round() as i64;
    let w = image.width() as i64;
    let h = image.height() as i64;
    let ch = image.channels() as usize;
    let buf = image.data_mut();

    let mut blend_px = |x: i64, y: i64| {
        if x < 0 || y < 0 || x >= w || y >= h {
            return;
        }
        let i = (y as usize * w as usize + x as usize) * ch;
        for c in 0..ch.min(3) {
            let bright = if c == 1 { 0.8 } else { 0.0 };
            buf[i + c] = buf[i + c] * 0.4 + bright * 0.6;
        }
    };
    for x in x0..x1 {
        blend_px(x, y0);
        blend_px(x, y1 - 1);
    }
    for y in y0..y1 {
        blend_px(x0, y);
        blend_px(x1 - 1, y);
    }
}

fn frame_text_origin(tile: &Tile, scale: f32) -> (u32, u32) {
    let rect = tile.rect();
    let x = ((rect.x as f32 * scale) + 2.0).round() as u32;
    let y = ((rect.y as f32 * scale) + 2.0).round() as u32;
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tesserae_core::{Image, Tile};

    #[test]
    fn preview_downscales_large_images() {
        let source = Image::new(4096, 4096, 3).unwrap();
        let previewer = Previewer::new(&source).unwrap();
        assert_eq!(previewer.scale(), 0.25);
    }

    #[test]
    fn get_preview_renders_only_once_per_change() {
        let source = Image::new(8, 8, 3).unwrap();
        let previewer = Previewer::new(&source).unwrap();
        let tiles: Vec<Tile> = vec![];
        let first = previewer.get_preview(&tiles, false);
        let before = previewer.changed_token();
        let second = previewer.get_preview(&tiles, false);
        assert_eq!(previewer.changed_token(), before);
        assert_eq!(first.data(), second.data());
    }

    #[test]
    fn overlay_marks_proc_tile_frame() {
        let source = Image::new(8, 8, 3).unwrap();
        let previewer = Previewer::new(&source).unwrap();
        let mut tile = Tile::new((0, 4), (0, 4), 0, 0, 1, 1);
        tile.proc = true;
        tile.worker = Some("a".to_string());
        previewer.mark_change();
        let preview = previewer.get_preview(std::slice::from_ref(&tile), false);
        assert!(preview.data().iter().any(|&v| v > 0.0));
    }
}
