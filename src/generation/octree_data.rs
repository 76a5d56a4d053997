//! Octree data structures - pure data and bit layouts
//!
//! Node words (32 bits):
//! - leaf:  `flags:2 = SOLID | r:8 | g:8 | b:8`
//! - inner: `flags:2 = EMPTY | child_mask:8 | offset:22`
//! - far pointer cell: raw `u32` delta, located by context
//!
//! Serialised layout of one inner node's children ("block"):
//! `popcount(child_mask)` child slots in ascending child order, then one
//! far-pointer cell per child that needed one, then each inner child's own
//! block in the same order. An inner node at slot `s` with offset `o` finds
//! its block at `s + o`; with `o = FAR_SENTINEL + k` the block is at
//! `f + cell[f]` where `f = block_base + popcount(parent_mask) + k`.

use bytemuck::{Pod, Zeroable};
use glam::UVec3;

use crate::constants::octree::*;
use crate::morton;

/// Packed octree node word.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct OctreeNode(pub u32);

static_assertions::const_assert_eq!(std::mem::size_of::<OctreeNode>(), 4);

impl OctreeNode {
    pub fn inner(child_mask: u8, offset: u32) -> Self {
        Self(
            FLAG_EMPTY << FLAG_SHIFT
                | (child_mask as u32) << MASK_SHIFT
                | (offset & OFFSET_MASK),
        )
    }

    pub fn leaf(rgb: [u8; 3]) -> Self {
        Self(
            FLAG_SOLID << FLAG_SHIFT
                | (rgb[0] as u32) << 16
                | (rgb[1] as u32) << 8
                | rgb[2] as u32,
        )
    }

    pub fn far(delta: u32) -> Self {
        Self(delta)
    }

    pub fn flags(&self) -> u32 {
        self.0 >> FLAG_SHIFT
    }

    pub fn is_leaf(&self) -> bool {
        self.flags() == FLAG_SOLID
    }

    pub fn child_mask(&self) -> u8 {
        ((self.0 >> MASK_SHIFT) & 0xFF) as u8
    }

    pub fn offset(&self) -> u32 {
        self.0 & OFFSET_MASK
    }

    pub fn rgb(&self) -> [u8; 3] {
        [(self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8]
    }
}

/// Node produced by the bottom-up sweep, before serialisation.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct IntermediateNode {
    pub colour: [u8; 3],
    pub visible: bool,
    pub parent: bool,
    pub child_mask: u8,
    /// Index of the last-pushed child in the intermediate array.
    pub child_start_index: u32,
    /// Slots the serialised children block of this node occupies.
    pub block_size: u64,
}

/// Serialised octree over a cube of side `dimensions.x`.
#[derive(Debug, Clone, Default)]
pub struct OctreePayload {
    pub dimensions: UVec3,
    pub nodes: Vec<OctreeNode>,
}

impl OctreePayload {
    /// Leaf colour covering `pos`, walking the serialised nodes.
    pub fn lookup(&self, pos: UVec3) -> Option<[u8; 3]> {
        let side = self.dimensions.x;
        if pos.x >= side || pos.y >= side || pos.z >= side {
            return None;
        }

        let mut node_index = 0usize;
        let mut node = *self.nodes.first()?;
        if node.is_leaf() {
            return Some(node.rgb());
        }

        // The root is the only slot of a one-slot block at 0.
        let mut block_base = 0usize;
        let mut block_len = 1usize;

        for level in (0..side.trailing_zeros()).rev() {
            let mask = node.child_mask();
            let child = morton::octree_child(pos, level);
            if mask & (1 << child) == 0 {
                return None;
            }

            let offset = node.offset();
            let child_base = if offset >= FAR_SENTINEL {
                let far_index = block_base + block_len + (offset - FAR_SENTINEL) as usize;
                far_index + self.nodes.get(far_index)?.0 as usize
            } else {
                node_index + offset as usize
            };

            let rank = (mask & ((1u16 << child) - 1) as u8).count_ones() as usize;
            node_index = child_base + rank;
            node = *self.nodes.get(node_index)?;
            if node.is_leaf() {
                return Some(node.rgb());
            }

            block_base = child_base;
            block_len = mask.count_ones() as usize;
        }

        None
    }

    pub fn byte_size(&self) -> u64 {
        (self.nodes.len() * std::mem::size_of::<OctreeNode>()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_layout() {
        let node = OctreeNode::leaf([0x12, 0x34, 0x56]);
        assert_eq!(node.0, 0x4012_3456);
        assert!(node.is_leaf());
        assert_eq!(node.rgb(), [0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_inner_layout() {
        let node = OctreeNode::inner(0b1010_0001, 0x20_0003);
        assert_eq!(node.flags(), FLAG_EMPTY);
        assert!(!node.is_leaf());
        assert_eq!(node.child_mask(), 0b1010_0001);
        assert_eq!(node.offset(), 0x20_0003);
    }

    #[test]
    fn test_lookup_direct_and_far_offsets() {
        // Root with children 0 and 7; child 7 reached through far pointer 0.
        let red = [255, 0, 0];
        let blue = [0, 0, 255];
        let nodes = vec![
            OctreeNode::inner(0b1000_0001, 1),
            OctreeNode::leaf(red),
            OctreeNode::inner(0b0000_0001, FAR_SENTINEL),
            OctreeNode::far(1),
            OctreeNode::leaf(blue),
        ];
        let payload = OctreePayload {
            dimensions: UVec3::splat(4),
            nodes,
        };

        assert_eq!(payload.lookup(UVec3::new(0, 0, 0)), Some(red));
        assert_eq!(payload.lookup(UVec3::new(1, 1, 1)), Some(red));
        assert_eq!(payload.lookup(UVec3::new(2, 2, 2)), Some(blue));
        assert_eq!(payload.lookup(UVec3::new(3, 3, 3)), None);
        assert_eq!(payload.lookup(UVec3::new(0, 2, 0)), None);
    }
}
