//! Renderer configuration
//!
//! Loaded from TOML; every field is optional.
//!
//! ```toml
//! buffer_count = 4
//! contrast = 1.0
//! black_level = 0.0
//!
//! [view]
//! zoom = 1.0
//! pixel_ratio = 1.0
//! vertical_shift = 0.0
//! ```

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Largest pool the renderer will allocate
pub const MAX_BUFFER_COUNT: usize = 16;

/// Placement of the video inside the window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    pub zoom: f32,
    pub pixel_ratio: f32,
    /// Fraction of the window height, positive moves down
    pub vertical_shift: f32,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pixel_ratio: 1.0,
            vertical_shift: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Slots in the ring buffer pool, matching the decoder's in-flight count
    pub buffer_count: usize,
    pub view: ViewSettings,
    pub contrast: f32,
    pub black_level: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            buffer_count: 4,
            view: ViewSettings::default(),
            contrast: 1.0,
            black_level: 0.0,
        }
    }
}

impl RendererConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: RendererConfig = toml::from_str(contents)?;
        config.buffer_count = config.buffer_count.clamp(1, MAX_BUFFER_COUNT);
        Ok(config)
    }

    /// Load config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        info!("Loaded renderer config from {:?}", path);
        Ok(config)
    }
}
