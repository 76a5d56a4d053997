//! Renderer configuration
//!
//! Loaded from TOML. Every field has a default so a partial file works.
//! The ray marching limits seed the shader macro table.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{VoxrayError, VoxrayResult};
use crate::manager::RenderStyle;
use crate::structures::StructureType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Root of the WGSL sources; module names resolve below it.
    pub shader_dir: PathBuf,
    pub default_structure: StructureType,
    pub render_style: RenderStyle,
    pub step_limit: u32,
    pub voxel_size: f32,
    pub intersection_max: u32,
    pub cycle_max: u32,
    /// Per-frame fence timeout.
    pub frame_timeout_ms: u64,
    pub watch_shaders: bool,
    /// Entries in the brickmap request feedback buffer.
    pub brickmap_request_slots: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("src/shaders"),
            default_structure: StructureType::Grid,
            render_style: RenderStyle::Normal,
            step_limit: 100,
            voxel_size: 1.0,
            intersection_max: 100,
            cycle_max: 10,
            frame_timeout_ms: 1000,
            watch_shaders: true,
            brickmap_request_slots: 1024,
        }
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> VoxrayError {
    VoxrayError::InvalidConfig {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl RendererConfig {
    pub fn validate(&self) -> VoxrayResult<()> {
        if self.shader_dir.as_os_str().is_empty() {
            return Err(invalid("shader_dir", "", "must not be empty"));
        }
        if self.step_limit == 0 {
            return Err(invalid("step_limit", self.step_limit, "must be positive"));
        }
        if !(self.voxel_size > 0.0) {
            return Err(invalid("voxel_size", self.voxel_size, "must be positive"));
        }
        if self.intersection_max == 0 {
            return Err(invalid("intersection_max", self.intersection_max, "must be positive"));
        }
        if self.cycle_max == 0 {
            return Err(invalid("cycle_max", self.cycle_max, "must be positive"));
        }
        if self.frame_timeout_ms == 0 {
            return Err(invalid("frame_timeout_ms", self.frame_timeout_ms, "must be positive"));
        }
        if self.brickmap_request_slots == 0 {
            return Err(invalid(
                "brickmap_request_slots",
                self.brickmap_request_slots,
                "must be positive",
            ));
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> VoxrayResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> VoxrayResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| VoxrayError::IoError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let config = Self::from_toml_str(&text)?;
        log::info!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    /// Shader macros derived from the ray marching limits.
    pub fn shader_settings(&self) -> [(&'static str, String); 4] {
        use crate::constants::macros;
        [
            (macros::STEP_LIMIT, self.step_limit.to_string()),
            (macros::VOXEL_SIZE, format!("{:?}", self.voxel_size)),
            (macros::INTERSECTION_MAX, self.intersection_max.to_string()),
            (macros::CYCLE_MAX, self.cycle_max.to_string()),
        ]
    }
}
