//! GPU acceleration structures
//!
//! Five interchangeable structures behind one tagged enum. Each owns a
//! builder task, its GPU buffers and a render pipeline registered with the
//! shader registry. The manager drives them through [`AccelerationStructure`].

pub mod brickmap;
pub mod common;
pub mod contree;
pub mod grid;
pub mod octree;
pub mod push_constants;
pub mod texture;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use glam::UVec2;
use serde::{Deserialize, Serialize};

pub use brickmap::BrickmapStructure;
pub use common::{StructureContext, StructureInitInfo};
pub use contree::ContreeStructure;
pub use grid::GridStructure;
pub use octree::OctreeStructure;
pub use texture::TextureStructure;

use crate::camera::CameraData;
use crate::error::{VoxrayError, VoxrayResult};
use crate::source::{SceneLoader, SharedSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureType {
    #[default]
    Grid = 0,
    Texture = 1,
    Octree = 2,
    Contree = 3,
    Brickmap = 4,
}

impl StructureType {
    pub const ALL: [StructureType; 5] = [
        StructureType::Grid,
        StructureType::Texture,
        StructureType::Octree,
        StructureType::Contree,
        StructureType::Brickmap,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StructureType::Grid => "Grid",
            StructureType::Texture => "Texture",
            StructureType::Octree => "Octree",
            StructureType::Contree => "Contree",
            StructureType::Brickmap => "Brickmap",
        }
    }

    /// Scene file extension holding a prebuilt structure of this type.
    pub fn extension(self) -> &'static str {
        match self {
            StructureType::Grid => "voxgrid",
            StructureType::Texture => "voxtexture",
            StructureType::Octree => "voxoctree",
            StructureType::Contree => "voxcontree",
            StructureType::Brickmap => "voxbrick",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.extension().eq_ignore_ascii_case(ext))
    }
}

impl fmt::Display for StructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StructureType {
    type Err = VoxrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| VoxrayError::ParseError {
                value: s.to_string(),
                expected_type: "structure type".to_string(),
            })
    }
}

/// Which structure types a scene can be loaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidStructures([bool; 5]);

impl ValidStructures {
    pub fn all() -> Self {
        Self([true; 5])
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Mark each type whose extension appears among `files`.
    pub fn from_extensions<P: AsRef<Path>>(files: &[P]) -> Self {
        let mut valid = Self::none();
        for file in files {
            let ty = file
                .as_ref()
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(StructureType::from_extension);
            if let Some(ty) = ty {
                valid.set(ty, true);
            }
        }
        valid
    }

    pub fn set(&mut self, ty: StructureType, valid: bool) {
        self.0[ty as usize] = valid;
    }

    pub fn is_valid(&self, ty: StructureType) -> bool {
        self.0[ty as usize]
    }
}

pub enum AccelerationStructure {
    Grid(GridStructure),
    Texture(TextureStructure),
    Octree(OctreeStructure),
    Contree(ContreeStructure),
    Brickmap(BrickmapStructure),
}

macro_rules! each_structure {
    ($value:expr, $s:ident => $body:expr) => {
        match $value {
            AccelerationStructure::Grid($s) => $body,
            AccelerationStructure::Texture($s) => $body,
            AccelerationStructure::Octree($s) => $body,
            AccelerationStructure::Contree($s) => $body,
            AccelerationStructure::Brickmap($s) => $body,
        }
    };
}

impl AccelerationStructure {
    /// Construct a structure of `ty` and register its shader modules.
    pub fn init(
        ty: StructureType,
        info: &StructureInitInfo,
        ctx: &mut StructureContext,
    ) -> VoxrayResult<Self> {
        Ok(match ty {
            StructureType::Grid => Self::Grid(GridStructure::init(info, ctx)?),
            StructureType::Texture => Self::Texture(TextureStructure::init(info, ctx)?),
            StructureType::Octree => Self::Octree(OctreeStructure::init(info, ctx)?),
            StructureType::Contree => Self::Contree(ContreeStructure::init(info, ctx)?),
            StructureType::Brickmap => Self::Brickmap(BrickmapStructure::init(info, ctx)?),
        })
    }

    pub fn structure_type(&self) -> StructureType {
        match self {
            Self::Grid(_) => StructureType::Grid,
            Self::Texture(_) => StructureType::Texture,
            Self::Octree(_) => StructureType::Octree,
            Self::Contree(_) => StructureType::Contree,
            Self::Brickmap(_) => StructureType::Brickmap,
        }
    }

    pub fn from_source(&mut self, ctx: &mut StructureContext, source: SharedSource) {
        each_structure!(self, s => s.from_source(ctx, source))
    }

    pub fn from_file(
        &mut self,
        ctx: &mut StructureContext,
        path: PathBuf,
        loader: Arc<dyn SceneLoader>,
    ) {
        each_structure!(self, s => s.from_file(ctx, path, loader))
    }

    pub fn update(&mut self, ctx: &mut StructureContext, dt: f32) {
        each_structure!(self, s => s.update(ctx, dt))
    }

    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        camera: &CameraData,
        ray_set: &wgpu::BindGroup,
        image_size: UVec2,
    ) {
        each_structure!(self, s => s.render(encoder, camera, ray_set, image_size))
    }

    /// Recompile every module of this structure with the current macros.
    pub fn update_shaders(&self, ctx: &mut StructureContext) {
        each_structure!(self, s => s.core().update_shaders(ctx))
    }

    pub fn modules(&self) -> &[&'static str] {
        each_structure!(self, s => s.core().modules())
    }

    pub fn memory_usage(&self) -> u64 {
        each_structure!(self, s => s.memory_usage())
    }

    pub fn voxel_count(&self) -> u64 {
        each_structure!(self, s => s.core().voxel_count())
    }

    pub fn node_count(&self) -> u64 {
        each_structure!(self, s => s.core().node_count())
    }

    pub fn is_generating(&self) -> bool {
        each_structure!(self, s => s.core().is_generating())
    }

    pub fn is_loading(&self) -> bool {
        each_structure!(self, s => s.core().is_loading())
    }

    pub fn finished_generation(&self) -> bool {
        each_structure!(self, s => s.core().finished_generation())
    }

    pub fn completion(&self) -> f32 {
        each_structure!(self, s => s.core().completion())
    }

    pub fn generation_time(&self) -> f32 {
        each_structure!(self, s => s.core().generation_time())
    }

    pub fn destroy(&mut self, ctx: &mut StructureContext) {
        each_structure!(self, s => s.destroy(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_structures_from_extensions() {
        let valid = ValidStructures::from_extensions(&[
            "scenes/sponza.voxoctree",
            "scenes/sponza.VOXBRICK",
            "scenes/readme.txt",
        ]);
        assert!(valid.is_valid(StructureType::Octree));
        assert!(valid.is_valid(StructureType::Brickmap));
        assert!(!valid.is_valid(StructureType::Grid));
        assert!(!valid.is_valid(StructureType::Contree));
    }

    #[test]
    fn test_structure_type_names_round_trip() {
        for ty in StructureType::ALL {
            assert_eq!(ty.name().parse::<StructureType>().unwrap(), ty);
            assert_eq!(StructureType::from_extension(ty.extension()), Some(ty));
        }
        assert!("sphere".parse::<StructureType>().is_err());
    }
}
