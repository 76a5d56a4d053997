//! Shared constants
//!
//! Bit layouts and limits that both the builders and the shaders depend on.
//! Changing any of these requires the matching WGSL to change too.

/// Compute workgroup edge used by every ray dispatch (8x8 threads).
pub const WORKGROUP_SIZE: u32 = 8;

/// Octree layout
pub mod octree {
    /// Depth of the leaf layer. The root of a cube of side `2^n` sits at `LEAF_DEPTH - n`.
    pub const LEAF_DEPTH: u32 = 22;
    /// Number of per-depth queues used by the bottom-up sweep.
    pub const MAX_DEPTH: usize = 23;
    /// Largest cube side: 3-way Morton codes hold 21 bits per axis.
    pub const MAX_SIDE: u32 = 1 << 21;

    pub const FLAG_EMPTY: u32 = 0;
    pub const FLAG_SOLID: u32 = 1;

    pub const FLAG_SHIFT: u32 = 30;
    pub const MASK_SHIFT: u32 = 22;
    pub const OFFSET_MASK: u32 = 0x3F_FFFF;

    /// Prospective child offsets at or beyond this reserve a far-pointer slot.
    pub const FAR_RESERVE_THRESHOLD: u64 = 0x1F_0000;
    /// Offsets at or beyond this value encode "far pointer k" as `FAR_SENTINEL + k`.
    pub const FAR_SENTINEL: u32 = 0x20_0000;
}

/// Contree layout
pub mod contree {
    /// Number of per-depth queues; depth 10 is the leaf layer.
    pub const MAX_DEPTH: usize = 11;
    pub const LEAF_DEPTH: u32 = 10;

    pub const FLAG_EMPTY: u64 = 0;
    pub const FLAG_SOLID: u64 = 1;
    pub const FLAG_SHIFT: u32 = 56;
}

/// Brickmap layout
pub mod brickmap {
    /// Edge of a brick in voxels.
    pub const BRICK_SIZE: u32 = 8;
    pub const BRICK_VOXELS: usize = 512;

    /// Brickgrid entry for a brick with no content.
    pub const EMPTY_BRICK: u32 = 0x1;
    /// Low bit: loaded or requested.
    pub const LOADED_BIT: u32 = 0x1;
    /// Second bit: requested by the feedback pass.
    pub const REQUESTED_BIT: u32 = 0x2;
    pub const INDEX_SHIFT: u32 = 2;
}

/// Macro names observed by the ray marching shaders.
pub mod macros {
    pub const GENERATION_FINISHED: &str = "GENERATION_FINISHED";
    pub const STEP_LIMIT: &str = "STEP_LIMIT";
    pub const VOXEL_SIZE: &str = "VOXEL_SIZE";
    pub const HEATMAP: &str = "HEATMAP";
    pub const CYCLES: &str = "CYCLES";
    pub const INTERSECTION_MAX: &str = "INTERSECTION_MAX";
    pub const CYCLE_MAX: &str = "CYCLE_MAX";
}
