//! CPU-side structure builders
//!
//! Every builder reads a [`VoxelSource`](crate::source::VoxelSource),
//! reports progress through a shared [`GenerationInfo`] and polls a
//! [`StopToken`]. Builders return plain payloads; uploading them is the
//! job of the GPU structures in [`crate::structures`].

mod brickmap_data;
mod brickmap_operations;
mod build_task;
mod colour_pool;
mod contree_data;
mod contree_operations;
mod generation_info;
mod grid;
mod octree_data;
mod octree_operations;
mod stop_token;
mod texture;

pub use brickmap_data::{brick_index, brick_pointer, Brickmap, BrickgridPtr, BrickmapPayload};
pub use brickmap_operations::build_brickmap;
pub use build_task::{BuildPoll, BuildTask};
pub use colour_pool::{target_type, BrickmapColour, ColourPool, PoolRegion, BLOCK_SIZES};
pub use contree_data::{ContreeNode, ContreePayload};
pub use contree_operations::build_contree;
pub use generation_info::{GenerationInfo, GenerationSnapshot, ProgressClock};
pub use grid::{build_grid, build_grid_voxels, GridPayload, GridVoxel};
pub use octree_data::{OctreeNode, OctreePayload};
pub use octree_operations::build_octree;
pub use stop_token::StopToken;
pub use texture::{build_texture, TexturePayload};

use thiserror::Error;

/// Why a builder did not produce a payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("build cancelled")]
    Cancelled,

    #[error("{structure} limit exceeded: {reason}")]
    Structural {
        structure: &'static str,
        reason: String,
    },
}
