//! Viewer settings, read from an optional `viewer.json`.
//!
//! Every field has a default so a partial file (or none at all) still yields a
//! usable viewer.

use serde::{Deserialize, Serialize};

/// One entry of the model selection control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub label: String,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightConfig {
    /// `0xRRGGBB`
    pub color: u32,
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalLightConfig {
    pub color: u32,
    pub intensity: f32,
    /// Position the light shines from, towards the origin.
    pub position: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Largest axial extent of a model after normalization.
    pub target_extent: f32,
    /// Height (px) of the control band above the canvas.
    pub reserved_band: f32,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// Initial distance of the camera from the origin along +Z.
    pub camera_distance: f32,
    pub enable_damping: bool,
    pub damping_factor: f32,
    pub background: u32,
    pub ambient: LightConfig,
    pub directional: DirectionalLightConfig,
    pub mesh_extension: String,
    pub material_extension: String,
    /// Prefix for asset fetches in the browser. `None` means page-relative.
    pub asset_base_url: Option<String>,
    /// Directory assets are read from in the native build.
    pub asset_root: String,
    pub catalog: Vec<CatalogEntry>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            target_extent: 2.0,
            reserved_band: 80.0,
            fov_y_degrees: 75.0,
            near: 0.1,
            far: 1000.0,
            camera_distance: 5.0,
            enable_damping: true,
            damping_factor: 0.05,
            background: 0xf0f0f0,
            ambient: LightConfig {
                color: 0xffffff,
                intensity: 0.5,
            },
            directional: DirectionalLightConfig {
                color: 0xffffff,
                intensity: 0.8,
                position: [1.0, 1.0, 1.0],
            },
            mesh_extension: "obj".to_owned(),
            material_extension: "mtl".to_owned(),
            asset_base_url: None,
            asset_root: "assets".to_owned(),
            catalog: Vec::new(),
        }
    }
}

impl ViewerConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        if !(config.target_extent.is_finite() && config.target_extent > 0.0) {
            anyhow::bail!("target_extent must be a positive number, got {}", config.target_extent);
        }
        if !(0.0..=1.0).contains(&config.damping_factor) {
            anyhow::bail!("damping_factor must lie in [0, 1], got {}", config.damping_factor);
        }
        Ok(config)
    }

    /// Parses `text`, falling back to the defaults (with a warning) when it
    /// is not a valid config.
    pub fn from_json_or_default(text: &str) -> Self {
        match Self::from_json(text) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring invalid viewer config: {e:#}");
                Self::default()
            }
        }
    }
}

/// `0xRRGGBB` to linear-ish `[r, g, b]` in `0..=1`.
pub fn rgb(color: u32) -> [f32; 3] {
    [
        ((color >> 16) & 0xff) as f32 / 255.0,
        ((color >> 8) & 0xff) as f32 / 255.0,
        (color & 0xff) as f32 / 255.0,
    ]
}
