//! Per-frame rendering: ray generation, the structure pass and the fence

pub mod frame;
pub mod ray_gen;

pub use frame::{FrameOutcome, FrameRenderer};
pub use ray_gen::{ray_set_layout, RayGenerator, RayImages, OUTPUT_FORMAT, RAY_FORMAT};
