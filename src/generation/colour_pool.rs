//! Hierarchical colour pool for brickmaps
//!
//! The pool is a sequence of 512-slot blocks. A block head of type 0 covers
//! 512 slots, type 1 covers 64 and type 2 covers 8. Splitting a free head of
//! type `t` turns it and the seven following sub-heads into type `t + 1`.
//! Allocations mark every slot of the taken block as used with the block's
//! type, so a scan landing anywhere inside a live block skips it.

use bytemuck::{Pod, Zeroable};

/// Block sizes indexed by type.
pub const BLOCK_SIZES: [usize; 3] = [512, 64, 8];
const TYPE_MASK: u8 = 0x3;
const USED_BIT: u8 = 0x4;

/// One pool slot: `data = type | used << 2`, then the colour bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BrickmapColour {
    pub data: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

static_assertions::const_assert_eq!(std::mem::size_of::<BrickmapColour>(), 4);

impl BrickmapColour {
    pub fn block_type(&self) -> u8 {
        self.data & TYPE_MASK
    }

    pub fn used(&self) -> bool {
        self.data & USED_BIT != 0
    }

    pub fn rgb(&self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    fn set_head(&mut self, block_type: u8, used: bool) {
        self.data = (block_type & TYPE_MASK) | if used { USED_BIT } else { 0 };
    }
}

#[inline]
fn offset(block_type: u8) -> usize {
    BLOCK_SIZES[block_type as usize]
}

/// Smallest block type that holds `count` colours.
pub fn target_type(count: usize) -> Option<u8> {
    match count {
        0..=8 => Some(2),
        9..=64 => Some(1),
        65..=512 => Some(0),
        _ => None,
    }
}

/// A live or free block found by walking the pool from slot 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolRegion {
    pub start: usize,
    pub block_type: u8,
    pub used: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ColourPool {
    slots: Vec<BrickmapColour>,
}

impl ColourPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> &[BrickmapColour] {
        &self.slots
    }

    pub fn into_slots(self) -> Vec<BrickmapColour> {
        self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn grow(&mut self) -> usize {
        let tail = self.slots.len();
        self.slots
            .resize(tail + BLOCK_SIZES[0], BrickmapColour::default());
        tail
    }

    fn split(&mut self, slot: usize) {
        let new_type = self.slots[slot].block_type() + 1;
        for i in 0..8 {
            self.slots[slot + i * offset(new_type)].set_head(new_type, false);
        }
    }

    /// Store `colours` in the first fitting free block at or after the
    /// 512-slot block containing `hint`. Returns the block start, or `None`
    /// if more than 512 colours are given.
    ///
    /// The scan advances in steps of the target block size, which always
    /// lands on a head or inside a used block.
    pub fn allocate(&mut self, colours: &[[u8; 3]], hint: usize) -> Option<usize> {
        let target = target_type(colours.len())?;
        let stride = offset(target);
        let mut slot = hint - hint % BLOCK_SIZES[0];

        loop {
            if slot >= self.slots.len() {
                slot = self.grow();
                continue;
            }

            let head = self.slots[slot];
            if head.used() || head.block_type() > target {
                slot += stride;
            } else if head.block_type() < target {
                self.split(slot);
            } else {
                for s in &mut self.slots[slot..slot + stride] {
                    s.set_head(target, true);
                }
                for (s, rgb) in self.slots[slot..].iter_mut().zip(colours) {
                    s.r = rgb[0];
                    s.g = rgb[1];
                    s.b = rgb[2];
                }
                return Some(slot);
            }
        }
    }

    /// Walk block heads from slot 0.
    pub fn regions(&self) -> Vec<PoolRegion> {
        let mut regions = Vec::new();
        let mut slot = 0;
        while slot < self.slots.len() {
            let head = self.slots[slot];
            regions.push(PoolRegion {
                start: slot,
                block_type: head.block_type(),
                used: head.used(),
            });
            slot += offset(head.block_type());
        }
        regions
    }
}
