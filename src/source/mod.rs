//! Voxel sources
//!
//! Everything the builders know about a scene goes through [`VoxelSource`].
//! On-disk formats stay behind the [`SceneLoader`] collaborator.

pub mod dense_source;
pub mod equation_source;
pub mod voxel_source;

use std::path::Path;
use std::sync::Arc;

pub use dense_source::DenseSource;
pub use equation_source::EquationSource;
pub use voxel_source::{cube_dimensions, in_bounds, power_covering, VoxelSource};

use crate::error::VoxrayResult;

/// Shared handle to a source. Builders on worker threads hold clones.
pub type SharedSource = Arc<dyn VoxelSource>;

/// Produces sources from scene assets.
pub trait SceneLoader: Send + Sync {
    fn load(&self, path: &Path) -> VoxrayResult<SharedSource>;
}
