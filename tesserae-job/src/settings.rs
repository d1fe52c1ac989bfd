//! Per-job settings and the static worker roster.

use serde::Deserialize;
use serde_json::Value;

/// Which image tiles are cropped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileSource {
    /// Crop tiles from the original, untouched source image.
    Raw,
    /// Crop tiles from the running output image, so later tiles see earlier
    /// tiles' results at shared edges.
    Out,
}

/// Per-job parameters, mirroring the original tool's settings dictionary.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Informational scale factor the workflow is expected to apply.
    pub image_scale: f32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Source image width in pixels.
    pub image_width: u32,
    /// Which image tiles are cropped from.
    pub tile_source: TileSource,
    /// Per-tile bilinear downscale applied before upload, if not `1.0`.
    #[serde(default)]
    pub upscale_factor: Option<f32>,
    /// Positive conditioning text written into the workflow before dispatch.
    #[serde(default)]
    pub positive_prompt: Option<String>,
    /// Negative conditioning text written into the workflow before dispatch.
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// Amount passed to `increment_seed` between tiles (currently a no-op).
    #[serde(default)]
    pub seed_increment: Option<i64>,
    /// The API-format node graph submitted to workers, cloned once per tile.
    pub workflow: Value,
    /// Whether to persist the assembled output image on completion.
    #[serde(default)]
    pub save: bool,
}

/// One entry in the static worker roster.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Base URL of the remote endpoint.
    pub url: String,
    /// Display name; defaults to the endpoint's authority if absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Initial dispatch priority; defaults to `1.0` if absent.
    #[serde(default)]
    pub priority: Option<f32>,
}
