//! PNG output with embedded workflow metadata text chunks.
//!
//! Saved tiles and final output images carry three PNG `tEXt` chunks:
//! `prompt` (the API-format workflow graph that was actually submitted to
//! workers), `workflow` (the original UI-format graph, if the caller
//! supplied one), and `lilium` (everything else in the job's settings, as a
//! JSON object, versioned).

use crate::error::{IoError, IoResult};
use serde::Serialize;
use serde_json::Value;
use std::io::BufWriter;
use std::path::Path;
use tesserae_core::Image;

/// Version tag stamped into the `lilium` metadata chunk.
pub const META_VERSION: &str = "tesserae-1.0";

/// Everything embedded in an output PNG besides the pixels.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputMeta {
    /// API-format workflow graph actually submitted to workers, if any.
    #[serde(skip)]
    pub prompt: Option<Value>,
    /// UI-format raw graph JSON, as originally supplied, if any.
    #[serde(skip)]
    pub workflow_raw: Option<String>,
    /// Everything else worth recording: slicer/mask parameters, prompts, etc.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Writes `image` (row-major `f32` in `[0, 1]`, 3 or 4 channels) as an 8-bit
/// PNG at `path`, embedding `meta`'s text chunks.
pub fn write(path: &Path, image: &Image, meta: &OutputMeta) -> IoResult<()> {
    if path.exists() {
        return Err(IoError::AlreadyExists(path.display().to_string()));
    }
    let file = std::fs::File::create(path)?;
    let w = BufWriter::new(file);

    let color_type = match image.channels() {
        3 => png::ColorType::Rgb,
        4 => png::ColorType::Rgba,
        n => return Err(IoError::Encode(format!("unsupported channel count {n}"))),
    };

    let mut encoder = png::Encoder::new(w, image.width(), image.height());
    encoder.set_color(color_type);
    encoder.set_depth(png::BitDepth::Eight);

    if let Some(prompt) = &meta.prompt {
        let text = serde_json::to_string(prompt)?;
        let _ = encoder.add_text_chunk("prompt".to_string(), text);
    }
    if let Some(raw) = &meta.workflow_raw {
        let _ = encoder.add_text_chunk("workflow".to_string(), raw.clone());
    }
    {
        let mut lilium = meta.extra.clone();
        lilium.insert("version".to_string(), Value::String(META_VERSION.to_string()));
        let text = serde_json::to_string(&Value::Object(lilium))?;
        let _ = encoder.add_text_chunk("lilium".to_string(), text);
    }

    let mut writer = encoder
        .write_header()
        .map_err(|e| IoError::Encode(e.to_string()))?;

    let bytes: Vec<u8> = image
        .data()
        .iter()
        .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    writer
        .write_image_data(&bytes)
        .map_err(|e| IoError::Encode(e.to_string()))?;
    Ok(())
}

/// The three text chunks embedded by [`write`], read back from a PNG file.
#[derive(Debug, Clone, Default)]
pub struct ImageMeta {
    /// `prompt` chunk, JSON-parsed, if present.
    pub prompt: Option<Value>,
    /// `workflow` chunk, raw string, if present.
    pub workflow_raw: Option<String>,
    /// `lilium` chunk, JSON-parsed, if present.
    pub lilium: Option<Value>,
}

/// Reads an image and its embedded `prompt`/`workflow`/`lilium` metadata.
pub fn read_with_meta(path: &Path) -> IoResult<(Image, ImageMeta)> {
    let file = std::fs::File::open(path)?;
    let decoder = png::Decoder::new(file);
    let mut reader = decoder
        .read_info()
        .map_err(|e| IoError::Decode(e.to_string()))?;
    let mut buf = vec![0u8; reader.output_buffer_size().ok_or_else(|| IoError::Decode("unknown buffer size".into()))?];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| IoError::Decode(e.to_string()))?;

    let channels = match info.color_type {
        png::ColorType::Rgb => 3,
        png::ColorType::Rgba => 4,
        other => return Err(IoError::Decode(format!("unsupported color type {other:?}"))),
    };
    let data: Vec<f32> = buf[..info.buffer_size()]
        .iter()
        .map(|&b| b as f32 / 255.0)
        .collect();
    let image = Image::from_vec(data, info.width, info.height, channels)
        .map_err(|e| IoError::Decode(e.to_string()))?;

    let mut meta = ImageMeta::default();
    let png_info = reader.info();
    for text in &png_info.uncompressed_latin1_text {
        assign_chunk(&mut meta, &text.keyword, text.text.clone());
    }
    for text in png_info.compressed_latin1_text.clone() {
        if let Ok(value) = text.get_text() {
            assign_chunk(&mut meta, &text.keyword, value);
        }
    }
    for text in png_info.utf8_text.clone() {
        if let Ok(value) = text.get_text() {
            assign_chunk(&mut meta, &text.keyword, value);
        }
    }
    Ok((image, meta))
}

fn assign_chunk(meta: &mut ImageMeta, keyword: &str, value: String) {
    match keyword {
        "prompt" => meta.prompt = serde_json::from_str(&value).ok(),
        "workflow" => meta.workflow_raw = Some(value),
        "lilium" => meta.lilium = serde_json::from_str(&value).ok(),
        other => tracing::debug!(keyword = other, "ignoring unrecognized PNG text chunk"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_pixels_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let image = Image::from_vec(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0], 2, 1, 3).unwrap();
        let mut extra = serde_json::Map::new();
        extra.insert("tile_size".into(), Value::from(768));
        let meta = OutputMeta {
            prompt: Some(serde_json::json!({"1": {"class_type": "KSampler"}})),
            workflow_raw: Some("{\"nodes\":[]}".into()),
            extra,
        };
        write(&path, &image, &meta).unwrap();

        let (read_back, read_meta) = read_with_meta(&path).unwrap();
        assert_eq!(read_back.width(), 2);
        assert_eq!(read_back.height(), 1);
        assert!(read_meta.prompt.is_some());
        assert_eq!(read_meta.workflow_raw.unwrap(), "{\"nodes\":[]}");
        assert_eq!(
            read_meta.lilium.unwrap().get("version").unwrap(),
            &Value::String(META_VERSION.to_string())
        );
    }
}
