//! Procedural source backed by a closure

use glam::{IVec3, UVec3, Vec3};

use super::voxel_source::{in_bounds, VoxelSource};

type Equation = dyn Fn(IVec3) -> Option<Vec3> + Send + Sync;

/// Volume defined by a pure function over a fixed extent.
pub struct EquationSource {
    dimensions: UVec3,
    equation: Box<Equation>,
}

impl EquationSource {
    pub fn new<F>(dimensions: UVec3, equation: F) -> Self
    where
        F: Fn(IVec3) -> Option<Vec3> + Send + Sync + 'static,
    {
        Self {
            dimensions,
            equation: Box::new(equation),
        }
    }

    /// Solid sphere centred in the extent, coloured by normalised position.
    pub fn sphere(side: u32) -> Self {
        let radius = side as f32 / 2.0;
        Self::new(UVec3::splat(side), move |pos| {
            let centre = Vec3::splat(radius);
            let p = pos.as_vec3() + 0.5;
            if p.distance(centre) <= radius {
                Some(p / side as f32)
            } else {
                None
            }
        })
    }

    /// Height field `y <= f(x, z)` with a constant colour.
    pub fn terrain(dimensions: UVec3, colour: Vec3) -> Self {
        let height = dimensions.y as f32;
        Self::new(dimensions, move |pos| {
            let h = (pos.x as f32 * 0.15).sin() * (pos.z as f32 * 0.1).cos() * 0.25 + 0.5;
            ((pos.y as f32) < h * height).then_some(colour)
        })
    }
}

impl VoxelSource for EquationSource {
    fn dimensions(&self) -> UVec3 {
        self.dimensions
    }

    fn sample(&self, pos: IVec3) -> Option<Vec3> {
        if !in_bounds(self.dimensions, pos) {
            return None;
        }
        (self.equation)(pos)
    }
}

impl std::fmt::Debug for EquationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EquationSource")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}
