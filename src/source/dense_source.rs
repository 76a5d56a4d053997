//! In-memory dense volume

use glam::{IVec3, UVec3, Vec3};

use super::voxel_source::{in_bounds, VoxelSource};

/// Dense `x + z*W + y*W*D` array of optional colours.
#[derive(Debug, Clone)]
pub struct DenseSource {
    dimensions: UVec3,
    voxels: Vec<Option<Vec3>>,
}

impl DenseSource {
    /// Empty volume of the given extent.
    pub fn new(dimensions: UVec3) -> Self {
        let len = dimensions.x as usize * dimensions.y as usize * dimensions.z as usize;
        Self {
            dimensions,
            voxels: vec![None; len],
        }
    }

    /// Volume filled by evaluating `f` once per coordinate.
    pub fn from_fn<F>(dimensions: UVec3, mut f: F) -> Self
    where
        F: FnMut(UVec3) -> Option<Vec3>,
    {
        let mut source = Self::new(dimensions);
        for y in 0..dimensions.y {
            for z in 0..dimensions.z {
                for x in 0..dimensions.x {
                    let pos = UVec3::new(x, y, z);
                    let index = source.index(pos);
                    source.voxels[index] = f(pos);
                }
            }
        }
        source
    }

    /// Set one voxel. Writes outside the extent are ignored.
    pub fn set(&mut self, pos: UVec3, colour: Option<Vec3>) {
        if in_bounds(self.dimensions, pos.as_ivec3()) {
            let index = self.index(pos);
            self.voxels[index] = colour;
        }
    }

    /// Number of present voxels.
    pub fn present_count(&self) -> u64 {
        self.voxels.iter().filter(|v| v.is_some()).count() as u64
    }

    #[inline]
    fn index(&self, pos: UVec3) -> usize {
        let d = self.dimensions;
        pos.x as usize + pos.z as usize * d.x as usize + pos.y as usize * (d.x * d.z) as usize
    }
}

impl VoxelSource for DenseSource {
    fn dimensions(&self) -> UVec3 {
        self.dimensions
    }

    fn sample(&self, pos: IVec3) -> Option<Vec3> {
        if !in_bounds(self.dimensions, pos) {
            return None;
        }
        self.voxels[self.index(pos.as_uvec3())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_sample() {
        let mut source = DenseSource::new(UVec3::new(3, 2, 4));
        source.set(UVec3::new(2, 1, 3), Some(Vec3::X));
        source.set(UVec3::new(9, 9, 9), Some(Vec3::Y));

        assert_eq!(source.sample(IVec3::new(2, 1, 3)), Some(Vec3::X));
        assert_eq!(source.sample(IVec3::new(0, 0, 0)), None);
        assert_eq!(source.present_count(), 1);
    }

    #[test]
    fn test_sample_morton_decodes() {
        let mut source = DenseSource::new(UVec3::splat(4));
        source.set(UVec3::new(1, 2, 3), Some(Vec3::Z));
        let code = crate::morton::encode3(1, 2, 3);
        assert_eq!(source.sample_morton(code), Some(Vec3::Z));
        let code = crate::morton::encode6(1, 2, 3);
        assert_eq!(source.sample_morton2(code), Some(Vec3::Z));
    }
}
