//! Push constant blocks read by the structure shaders
//!
//! Layouts follow WGSL rules: a `vec3` occupies 16 bytes, matrices are
//! column-major and 16-byte aligned.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec3, Vec3};

/// Grid and texture: camera position and voxel dimensions.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VolumePushConstants {
    pub camera_pos: [f32; 3],
    pub _pad0: u32,
    pub dimensions: [u32; 3],
    pub _pad1: u32,
}

/// Octree and contree: camera position plus tree-space transforms.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TreePushConstants {
    pub camera_pos: [f32; 3],
    pub _pad0: u32,
    pub world: [[f32; 4]; 4],
    pub world_inv: [[f32; 4]; 4],
    pub scale_inv: [[f32; 4]; 4],
}

/// Brickmap: camera position, brickgrid extent and the hit buffer address.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BrickmapPushConstants {
    pub camera_pos: [f32; 3],
    pub _pad0: u32,
    pub brickgrid_size: [u32; 3],
    pub _pad1: u32,
    pub hit_data_address: u64,
    pub _pad2: u64,
}

static_assertions::const_assert_eq!(std::mem::size_of::<VolumePushConstants>(), 32);
static_assertions::const_assert_eq!(std::mem::size_of::<TreePushConstants>(), 208);
static_assertions::const_assert_eq!(std::mem::size_of::<BrickmapPushConstants>(), 48);

pub fn volume_constants(camera_pos: Vec3, dimensions: UVec3) -> VolumePushConstants {
    VolumePushConstants {
        camera_pos: camera_pos.to_array(),
        dimensions: dimensions.to_array(),
        ..Default::default()
    }
}

/// Tree space is the cube `[1, 2)^3`; `world` maps it onto `[0, dims)^3`.
pub fn tree_constants(camera_pos: Vec3, dimensions: UVec3) -> TreePushConstants {
    let scale = Mat4::from_scale(dimensions.as_vec3());
    let world = scale * Mat4::from_translation(Vec3::splat(-1.0));
    TreePushConstants {
        camera_pos: camera_pos.to_array(),
        _pad0: 0,
        world: world.to_cols_array_2d(),
        world_inv: world.inverse().to_cols_array_2d(),
        scale_inv: scale.inverse().to_cols_array_2d(),
    }
}

pub fn brickmap_constants(
    camera_pos: Vec3,
    brickgrid_size: UVec3,
    hit_data_address: u64,
) -> BrickmapPushConstants {
    BrickmapPushConstants {
        camera_pos: camera_pos.to_array(),
        brickgrid_size: brickgrid_size.to_array(),
        hit_data_address,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_world_maps_unit_cube() {
        let c = tree_constants(Vec3::ZERO, UVec3::splat(64));
        let world = Mat4::from_cols_array_2d(&c.world);
        let world_inv = Mat4::from_cols_array_2d(&c.world_inv);

        assert!(world.transform_point3(Vec3::ONE).abs_diff_eq(Vec3::ZERO, 1e-5));
        assert!(world
            .transform_point3(Vec3::splat(2.0))
            .abs_diff_eq(Vec3::splat(64.0), 1e-4));
        assert!(world_inv
            .transform_point3(Vec3::splat(32.0))
            .abs_diff_eq(Vec3::splat(1.5), 1e-5));
    }

    #[test]
    fn test_scale_inverse_ignores_translation() {
        let c = tree_constants(Vec3::new(1.0, 2.0, 3.0), UVec3::new(4, 8, 16));
        let scale_inv = Mat4::from_cols_array_2d(&c.scale_inv);
        let d = scale_inv.transform_vector3(Vec3::new(4.0, 8.0, 16.0));
        assert!(d.abs_diff_eq(Vec3::ONE, 1e-6));
        assert_eq!(c.camera_pos, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_packed_fields_land_at_wgsl_offsets() {
        let c = brickmap_constants(Vec3::splat(0.5), UVec3::new(3, 4, 5), 0xDEAD_BEEF_0000_0001);
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&c));
        assert_eq!(&words[4..7], &[3, 4, 5]);
        assert_eq!(words[8], 0x0000_0001);
        assert_eq!(words[9], 0xDEAD_BEEF);

        let v = volume_constants(Vec3::ZERO, UVec3::new(7, 8, 9));
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&v));
        assert_eq!(&words[4..7], &[7, 8, 9]);
    }
}
