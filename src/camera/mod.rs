/// Camera Module - Data-Oriented Programming (DOP) style
///
/// - camera_data.rs: Pure data structures with NO methods
/// - camera_operations.rs: Pure functions that operate on data
pub mod camera_data;
pub mod camera_operations;

pub use camera_data::{CameraData, RayGenConstants};

pub use camera_operations::{
    build_ray_constants, calculate_forward_vector, calculate_right_vector, calculate_up_vector,
    init_camera, look_at, update_aspect_ratio,
};
