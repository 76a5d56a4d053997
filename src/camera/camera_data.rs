//! Camera data structures - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in camera_operations.rs

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Camera data structure - pure data, no methods
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraData {
    /// Camera position in voxel coordinates
    pub position: Vec3,

    /// Yaw rotation (radians, around Y axis)
    pub yaw_radians: f32,

    /// Pitch rotation (radians, around X axis)
    pub pitch_radians: f32,

    /// Field of view (vertical, radians)
    pub fov_radians: f32,

    /// Aspect ratio (width / height)
    pub aspect_ratio: f32,
}

/// Per-frame ray generation constants.
/// Must match `RayGenConstants` in ray_gen.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RayGenConstants {
    /// Forward vector scaled by the focal length
    pub forward: [f32; 3],
    pub _pad0: f32,
    /// Right vector scaled by `aspect * tan(fov / 2)`
    pub right: [f32; 3],
    pub _pad1: f32,
    /// Up vector scaled by `tan(fov / 2)`
    pub up: [f32; 3],
    pub _pad2: f32,
    pub image_size: [u32; 2],
    pub _pad3: [u32; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<RayGenConstants>(), 64);

impl Default for CameraData {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            yaw_radians: 0.0,
            pitch_radians: 0.0,
            fov_radians: 70.0_f32.to_radians(),
            aspect_ratio: 16.0 / 9.0,
        }
    }
}
