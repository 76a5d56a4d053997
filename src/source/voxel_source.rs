//! Voxel source contract
//!
//! A source is a finite, read-only volume. Builders sample it from worker
//! threads, so implementations must be pure and `Send + Sync`.

use glam::{IVec3, UVec3, Vec3};

use crate::morton;

/// Provider of an optional RGB colour per integer coordinate.
pub trait VoxelSource: Send + Sync {
    /// Extent of the volume. Stable across calls.
    fn dimensions(&self) -> UVec3;

    /// Colour at `pos`, or `None` when the voxel is absent or out of bounds.
    fn sample(&self, pos: IVec3) -> Option<Vec3>;

    /// Sample at a 3-way Morton code.
    fn sample_morton(&self, code: u64) -> Option<Vec3> {
        self.sample(morton::decode3(code).as_ivec3())
    }

    /// Sample at a 6-way Morton code.
    fn sample_morton2(&self, code: u64) -> Option<Vec3> {
        self.sample(morton::decode6(code).as_ivec3())
    }

    /// Per-axis smallest power of `n` covering the extent.
    fn dimensions_div_n(&self, n: u32) -> UVec3 {
        let dims = self.dimensions();
        UVec3::new(
            power_covering(dims.x, n),
            power_covering(dims.y, n),
            power_covering(dims.z, n),
        )
    }

    /// Number of coordinates inside the extent.
    fn volume(&self) -> u64 {
        let d = self.dimensions();
        d.x as u64 * d.y as u64 * d.z as u64
    }
}

/// Smallest power of `n` that is `>= extent`. An extent of 0 or 1 yields 1.
pub fn power_covering(extent: u32, n: u32) -> u32 {
    let n = n.max(2);
    let mut side: u32 = 1;
    while side < extent {
        side = side.saturating_mul(n);
    }
    side
}

/// Largest axis of `dims` as a cube.
pub fn cube_dimensions(dims: UVec3) -> UVec3 {
    UVec3::splat(dims.max_element())
}

/// True when `pos` lies inside `[0, dims)` on every axis.
#[inline]
pub fn in_bounds(dims: UVec3, pos: IVec3) -> bool {
    pos.x >= 0
        && pos.y >= 0
        && pos.z >= 0
        && (pos.x as u32) < dims.x
        && (pos.y as u32) < dims.y
        && (pos.z as u32) < dims.z
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_covering() {
        assert_eq!(power_covering(0, 2), 1);
        assert_eq!(power_covering(1, 2), 1);
        assert_eq!(power_covering(2, 2), 2);
        assert_eq!(power_covering(3, 2), 4);
        assert_eq!(power_covering(100, 2), 128);
        assert_eq!(power_covering(4, 4), 4);
        assert_eq!(power_covering(5, 4), 16);
        assert_eq!(power_covering(65, 4), 256);
    }

    #[test]
    fn test_cube_dimensions() {
        assert_eq!(cube_dimensions(UVec3::new(4, 16, 8)), UVec3::splat(16));
    }

    #[test]
    fn test_in_bounds() {
        let dims = UVec3::new(2, 3, 4);
        assert!(in_bounds(dims, IVec3::new(1, 2, 3)));
        assert!(!in_bounds(dims, IVec3::new(2, 0, 0)));
        assert!(!in_bounds(dims, IVec3::new(0, -1, 0)));
        assert!(!in_bounds(dims, IVec3::new(0, 0, 4)));
    }
}
