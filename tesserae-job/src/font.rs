//! A trivial fixed 3x5 bitmap font for previewer overlay labels.
//!
//! Mirrors the original tool's hard-coded glyph bitmaps; this is a rendering
//! helper, not a subsystem, so only the characters that actually show up in
//! worker names and the "PREVIEW" watermark are covered. Anything else
//! renders as a blank cell.

use tesserae_core::Image;

const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;
const GLYPH_GAP: u32 = 1;

fn glyph(c: char) -> [u8; 5] {
    match c.to_ascii_uppercase() {
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b101, 0b111, 0b111, 0b111, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b111, 0b011],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '_' => [0b000, 0b000, 0b000, 0b000, 0b111],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        _ => [0b000, 0b000, 0b000, 0b000, 0b000],
    }
}

/// Stamps `text` into `image` at `origin` using a bright, partially
/// translucent green so labels read over any underlying pixel color.
/// Unknown characters and glyph pixels that fall off the image are skipped.
pub fn draw_text(image: &mut Image, text: &str, origin: (u32, u32)) {
    let (ox, oy) = origin;
    let ch = image.channels() as usize;
    let width = image.width();
    let height = image.height();
    let buf = image.data_mut();

    for (i, c) in text.chars().enumerate() {
        let gx = ox + i as u32 * (GLYPH_WIDTH + GLYPH_GAP);
        if gx >= width {
            break;
        }
        for (row, bits) in glyph(c).iter().enumerate() {
            let y = oy + row as u32;
            if y >= height || row as u32 >= GLYPH_HEIGHT {
                continue;
            }
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let x = gx + col;
                if x >= width {
                    continue;
                }
                let idx = (y as usize * width as usize + x as usize) * ch;
                for c in 0..ch.min(3) {
                    let bright = if c == 1 { 1.0 } else { 0.15 };
                    buf[idx + c] = buf[idx + c] * 0.25 + bright * 0.75;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tesserae_core::Image;

    #[test]
    fn draw_text_touches_only_glyph_region() {
        let mut image = Image::new(16, 8, 3).unwrap();
        draw_text(&mut image, "A", (0, 0));
        assert!(image.data().iter().any(|&v| v > 0.0));
        // The bottom two rows are past the 5-row glyph height and untouched.
        for x in 0..3 {
            assert_eq!(image.pixel(x, 6)[1], 0.0);
        }
    }

    #[test]
    fn unknown_glyph_is_blank() {
        let mut image = Image::new(8, 8, 3).unwrap();
        draw_text(&mut image, "~", (0, 0));
        assert!(image.data().iter().all(|&v| v == 0.0));
    }
}
