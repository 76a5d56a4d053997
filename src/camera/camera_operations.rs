//! Camera operations - Pure DOP functions
//!
//! All functions are pure: they take data, return new data, no side effects.

use glam::{UVec2, Vec3};

use super::camera_data::{CameraData, RayGenConstants};

const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

/// Initialize camera with default lens settings
pub fn init_camera(position: Vec3, yaw: f32, pitch: f32) -> CameraData {
    CameraData {
        position,
        yaw_radians: yaw,
        pitch_radians: pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT),
        ..Default::default()
    }
}

/// Camera at `position` facing `target`
pub fn look_at(position: Vec3, target: Vec3) -> CameraData {
    let dir = (target - position).normalize_or_zero();
    let yaw = dir.z.atan2(dir.x);
    let pitch = dir.y.clamp(-1.0, 1.0).asin();
    init_camera(position, yaw, pitch)
}

/// Update aspect ratio on resize
pub fn update_aspect_ratio(camera: &CameraData, width: u32, height: u32) -> CameraData {
    let mut new_camera = *camera;
    new_camera.aspect_ratio = width as f32 / height.max(1) as f32;
    new_camera
}

pub fn calculate_forward_vector(yaw: f32, pitch: f32) -> Vec3 {
    Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos())
}

pub fn calculate_right_vector(yaw: f32) -> Vec3 {
    Vec3::new(-yaw.sin(), 0.0, yaw.cos())
}

pub fn calculate_up_vector(yaw: f32, pitch: f32) -> Vec3 {
    calculate_right_vector(yaw)
        .cross(calculate_forward_vector(yaw, pitch))
        .normalize()
}

/// Ray basis for the ray generation pass. A pixel's ray direction is
/// `forward + u * right + v * up` with `u, v` in `[-1, 1]`.
pub fn build_ray_constants(camera: &CameraData, image_size: UVec2) -> RayGenConstants {
    let half_height = (camera.fov_radians * 0.5).tan();
    let half_width = half_height * camera.aspect_ratio;

    let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
    let right = calculate_right_vector(camera.yaw_radians) * half_width;
    let up = calculate_up_vector(camera.yaw_radians, camera.pitch_radians) * half_height;

    RayGenConstants {
        forward: forward.to_array(),
        _pad0: 0.0,
        right: right.to_array(),
        _pad1: 0.0,
        up: up.to_array(),
        _pad2: 0.0,
        image_size: image_size.to_array(),
        _pad3: [0; 2],
    }
}
