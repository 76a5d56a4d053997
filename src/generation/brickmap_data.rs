//! Brickmap data structures - pure data and bit layouts
//!
//! Brickgrid entries (`u32`): bit 0 loaded, bit 1 requested, bits 2.. the
//! one-based brickmap index. `0x1` is a loaded brick without content.
//! Brickmap records hold a colour pool offset and one 64-bit occupancy word
//! per brick row `y`, bit `z*8 + x`. Present voxels' colours are stored
//! contiguously in `y, z, x` order starting at the colour offset.

use bytemuck::{Pod, Zeroable};
use glam::UVec3;

use super::colour_pool::BrickmapColour;
use crate::constants::brickmap::*;

pub type BrickgridPtr = u32;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Brickmap {
    pub colour_ptr: u64,
    pub occupancy: [u64; 8],
}

static_assertions::const_assert_eq!(std::mem::size_of::<Brickmap>(), 72);

impl Brickmap {
    pub fn voxel_count(&self) -> u64 {
        self.occupancy.iter().map(|w| w.count_ones() as u64).sum()
    }

    pub fn is_set(&self, local: UVec3) -> bool {
        self.occupancy[local.y as usize] >> (local.z * 8 + local.x) & 1 == 1
    }

    /// Position of `local` among the present voxels in `y, z, x` order.
    pub fn colour_rank(&self, local: UVec3) -> usize {
        let bit = local.z * 8 + local.x;
        let below: u32 = self.occupancy[..local.y as usize]
            .iter()
            .map(|w| w.count_ones())
            .sum();
        let row = self.occupancy[local.y as usize] & ((1u64 << bit) - 1);
        (below + row.count_ones()) as usize
    }
}

/// Encode a brickgrid entry for brickmap `index` (zero-based).
pub fn brick_pointer(index: usize) -> BrickgridPtr {
    LOADED_BIT | ((index as u32 + 1) << INDEX_SHIFT)
}

/// Zero-based brickmap index of a brickgrid entry, if it has content.
pub fn brick_index(ptr: BrickgridPtr) -> Option<usize> {
    match ptr >> INDEX_SHIFT {
        0 => None,
        n => Some(n as usize - 1),
    }
}

#[derive(Debug, Clone, Default)]
pub struct BrickmapPayload {
    pub brickgrid_size: UVec3,
    pub brickgrid: Vec<BrickgridPtr>,
    pub brickmaps: Vec<Brickmap>,
    pub colours: Vec<BrickmapColour>,
}

impl BrickmapPayload {
    #[inline]
    pub fn brick_slot(&self, brick: UVec3) -> usize {
        let g = self.brickgrid_size;
        brick.x as usize + brick.z as usize * g.x as usize + brick.y as usize * (g.x * g.z) as usize
    }

    /// RGB bytes at voxel `pos`, if present.
    pub fn lookup(&self, pos: UVec3) -> Option<[u8; 3]> {
        let brick = pos / BRICK_SIZE;
        let g = self.brickgrid_size;
        if brick.x >= g.x || brick.y >= g.y || brick.z >= g.z {
            return None;
        }

        let map = self.brickmaps.get(brick_index(self.brickgrid[self.brick_slot(brick)])?)?;
        let local = pos % BRICK_SIZE;
        if !map.is_set(local) {
            return None;
        }
        let slot = map.colour_ptr as usize + map.colour_rank(local);
        self.colours.get(slot).map(|c| c.rgb())
    }

    pub fn byte_size(&self) -> u64 {
        (self.brickgrid.len() * 4
            + self.brickmaps.len() * std::mem::size_of::<Brickmap>()
            + self.colours.len() * 4) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_encoding() {
        assert_eq!(brick_pointer(0), 0b101);
        assert_eq!(brick_index(brick_pointer(0)), Some(0));
        assert_eq!(brick_index(brick_pointer(41)), Some(41));
        assert_eq!(brick_index(EMPTY_BRICK), None);
        assert_eq!(brick_index(brick_pointer(3) | REQUESTED_BIT), Some(3));
    }

    #[test]
    fn test_colour_rank_follows_yzx_order() {
        let mut map = Brickmap::default();
        map.occupancy[0] = 0b11;
        map.occupancy[2] = 1 << 9;
        assert_eq!(map.colour_rank(UVec3::new(1, 0, 0)), 1);
        assert_eq!(map.colour_rank(UVec3::new(1, 2, 1)), 2);
        assert!(map.is_set(UVec3::new(1, 2, 1)));
        assert_eq!(map.voxel_count(), 3);
    }
}
