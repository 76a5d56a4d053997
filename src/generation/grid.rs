//! Dense grid builder
//!
//! Linear scan in `y, z, x` order. Voxel `i = x + z*W + y*W*D` owns bit
//! `i % 32` of occupancy word `i / 32` and colour entry `i`.

use glam::{IVec3, UVec3, Vec3};

use super::{BuildError, GenerationInfo, ProgressClock, StopToken};
use crate::source::VoxelSource;

/// One voxel of the dense grid before packing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GridVoxel {
    pub visible: bool,
    pub colour: Vec3,
}

/// GPU-ready grid: LSB-first occupancy words and packed RGB floats.
#[derive(Debug, Clone, Default)]
pub struct GridPayload {
    pub dimensions: UVec3,
    pub occupancy: Vec<u32>,
    pub colours: Vec<[f32; 3]>,
}

impl GridPayload {
    pub fn from_voxels(dimensions: UVec3, voxels: &[GridVoxel]) -> Self {
        let mut occupancy = vec![0u32; voxels.len().div_ceil(32)];
        let mut colours = Vec::with_capacity(voxels.len());
        for (i, voxel) in voxels.iter().enumerate() {
            if voxel.visible {
                occupancy[i / 32] |= 1 << (i % 32);
            }
            colours.push(voxel.colour.to_array());
        }
        Self {
            dimensions,
            occupancy,
            colours,
        }
    }

    #[inline]
    pub fn index(&self, pos: UVec3) -> usize {
        let d = self.dimensions;
        pos.x as usize + pos.z as usize * d.x as usize + pos.y as usize * (d.x * d.z) as usize
    }

    /// Colour at `pos` if the voxel is present.
    pub fn lookup(&self, pos: UVec3) -> Option<Vec3> {
        let d = self.dimensions;
        if pos.x >= d.x || pos.y >= d.y || pos.z >= d.z {
            return None;
        }
        let i = self.index(pos);
        let word = *self.occupancy.get(i / 32)?;
        if word & (1 << (i % 32)) == 0 {
            return None;
        }
        self.colours.get(i).map(|c| Vec3::from_array(*c))
    }

    pub fn byte_size(&self) -> u64 {
        (self.occupancy.len() * 4 + self.colours.len() * 12) as u64
    }
}

/// Sample every voxel of `source` into a flat `W*H*D` array.
pub fn build_grid_voxels(
    source: &dyn VoxelSource,
    info: &GenerationInfo,
    stop: &StopToken,
) -> Result<Vec<GridVoxel>, BuildError> {
    let dims = source.dimensions();
    let total = source.volume();
    let clock = ProgressClock::start(info);
    info.set_voxel_count(0);

    let mut voxels = Vec::with_capacity(total as usize);
    let mut done = 0u64;
    for y in 0..dims.y {
        for z in 0..dims.z {
            for x in 0..dims.x {
                stop.check()?;

                let sample = source.sample(IVec3::new(x as i32, y as i32, z as i32));
                voxels.push(GridVoxel {
                    visible: sample.is_some(),
                    colour: sample.unwrap_or(Vec3::ZERO),
                });
                if sample.is_some() {
                    info.add_voxels(1);
                }

                done += 1;
                clock.record(done, total);
            }
        }
    }

    info.set_node_count(total);
    clock.finish();
    Ok(voxels)
}

/// Build the packed grid payload.
pub fn build_grid(
    source: &dyn VoxelSource,
    info: &GenerationInfo,
    stop: &StopToken,
) -> Result<GridPayload, BuildError> {
    let voxels = build_grid_voxels(source, info, stop)?;
    Ok(GridPayload::from_voxels(source.dimensions(), &voxels))
}
