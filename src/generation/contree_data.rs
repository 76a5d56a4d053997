//! Contree data structures - pure data and bit layouts
//!
//! 128-bit nodes stored as two `u64` words:
//! - leaf:  `w0 = SOLID << 56 | r16`, `w1 = g16 << 32 | b16`
//! - inner: `w0 = EMPTY << 56 | rgb24 << 32 | offset32`, `w1 = child_mask`
//!
//! Children of an inner node at index `i` are contiguous, in ascending
//! child order, starting at `i + offset`.

use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec3};

use crate::constants::contree::*;
use crate::morton;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ContreeNode {
    pub words: [u64; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<ContreeNode>(), 16);

impl ContreeNode {
    pub fn inner(child_mask: u64, offset: u32, rgb: [u8; 3]) -> Self {
        let colour = (rgb[0] as u64) << 16 | (rgb[1] as u64) << 8 | rgb[2] as u64;
        Self {
            words: [
                FLAG_EMPTY << FLAG_SHIFT | colour << 32 | offset as u64,
                child_mask,
            ],
        }
    }

    pub fn leaf(colour: Vec3) -> Self {
        let c = (colour.clamp(Vec3::ZERO, Vec3::ONE) * 65535.0).as_uvec3();
        Self {
            words: [
                FLAG_SOLID << FLAG_SHIFT | c.x as u64,
                (c.y as u64) << 32 | c.z as u64,
            ],
        }
    }

    pub fn flags(&self) -> u64 {
        self.words[0] >> FLAG_SHIFT
    }

    pub fn is_leaf(&self) -> bool {
        self.flags() == FLAG_SOLID
    }

    pub fn child_mask(&self) -> u64 {
        self.words[1]
    }

    pub fn offset(&self) -> u32 {
        self.words[0] as u32
    }

    /// Average colour stored on inner nodes.
    pub fn inner_rgb(&self) -> [u8; 3] {
        let c = (self.words[0] >> 32) as u32;
        [(c >> 16) as u8, (c >> 8) as u8, c as u8]
    }

    /// 16-bit channels of a leaf.
    pub fn leaf_rgb16(&self) -> [u16; 3] {
        [
            self.words[0] as u16,
            (self.words[1] >> 32) as u16,
            self.words[1] as u16,
        ]
    }

    pub fn leaf_colour(&self) -> Vec3 {
        let [r, g, b] = self.leaf_rgb16();
        Vec3::new(r as f32, g as f32, b as f32) / 65535.0
    }
}

/// Node produced by the bottom-up sweep, before serialisation.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct IntermediateNode {
    pub colour: Vec3,
    pub visible: bool,
    pub parent: bool,
    pub child_mask: u64,
    /// Index of the last-pushed child, which is the lowest present child.
    pub child_start_index: u32,
}

/// Serialised contree over a cube of side `dimensions.x` (a power of 4).
#[derive(Debug, Clone, Default)]
pub struct ContreePayload {
    pub dimensions: UVec3,
    pub nodes: Vec<ContreeNode>,
}

impl ContreePayload {
    /// Leaf colour covering `pos`.
    pub fn lookup(&self, pos: UVec3) -> Option<Vec3> {
        let side = self.dimensions.x;
        if pos.x >= side || pos.y >= side || pos.z >= side {
            return None;
        }

        let mut index = 0usize;
        let mut node = *self.nodes.first()?;
        let levels = side.trailing_zeros() / 2;

        for level in (0..levels).rev() {
            if node.is_leaf() {
                return Some(node.leaf_colour());
            }
            let mask = node.child_mask();
            let child = morton::contree_child(pos, level);
            if mask & (1u64 << child) == 0 {
                return None;
            }
            let rank = (mask & ((1u64 << child) - 1)).count_ones() as usize;
            index += node.offset() as usize + rank;
            node = *self.nodes.get(index)?;
        }

        node.is_leaf().then(|| node.leaf_colour())
    }

    pub fn byte_size(&self) -> u64 {
        (self.nodes.len() * std::mem::size_of::<ContreeNode>()) as u64
    }
}
