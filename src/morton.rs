//! Morton codes
//!
//! Two interleavings of integer coordinates into a `u64`:
//!
//! * 3-way (octree): code bit `3k` is `x_k`, `3k+1` is `z_k`, `3k+2` is `y_k`.
//!   Each group of three bits selects one of 8 children.
//! * 6-way (contree): coordinates are interleaved in pairs of bits. Group `k`
//!   holds `x` bits `2k..2k+1` at `6k`, `z` at `6k+2` and `y` at `6k+4`, so one
//!   group selects one of 64 children as `cx + cz*4 + cy*16`.
//!
//! Both are partial: coordinates beyond 21 bits (3-way) or 20 bits (6-way)
//! do not fit and are masked away. Callers supply codes below `x*y*z`.

use glam::UVec3;

/// Spread the low 21 bits of `v` so that bit `k` lands on bit `3k`.
#[inline]
fn split_by_3(v: u32) -> u64 {
    let mut x = (v as u64) & 0x1f_ffff;
    x = (x | x << 32) & 0x1f00000000ffff;
    x = (x | x << 16) & 0x1f0000ff0000ff;
    x = (x | x << 8) & 0x100f00f00f00f00f;
    x = (x | x << 4) & 0x10c30c30c30c30c3;
    x = (x | x << 2) & 0x1249249249249249;
    x
}

/// Inverse of [`split_by_3`].
#[inline]
fn compact_by_3(code: u64) -> u32 {
    let mut x = code & 0x1249249249249249;
    x = (x | x >> 2) & 0x10c30c30c30c30c3;
    x = (x | x >> 4) & 0x100f00f00f00f00f;
    x = (x | x >> 8) & 0x1f0000ff0000ff;
    x = (x | x >> 16) & 0x1f00000000ffff;
    x = (x | x >> 32) & 0x1f_ffff;
    x as u32
}

/// Spread the low 20 bits of `v` in pairs so that pair `k` lands on bits `6k..6k+1`.
#[inline]
fn split_by_2x3(v: u32) -> u64 {
    let mut x = (v as u64) & 0xf_ffff;
    x = (x | x << 32) & 0xf00000000ffff;
    x = (x | x << 16) & 0xf0000ff0000ff;
    x = (x | x << 8) & 0xf00f00f00f00f;
    x = (x | x << 4) & 0xc30c30c30c30c3;
    x
}

/// Inverse of [`split_by_2x3`].
#[inline]
fn compact_by_2x3(code: u64) -> u32 {
    let mut x = code & 0xc30c30c30c30c3;
    x = (x | x >> 4) & 0xf00f00f00f00f;
    x = (x | x >> 8) & 0xf0000ff0000ff;
    x = (x | x >> 16) & 0xf00000000ffff;
    x = (x | x >> 32) & 0xf_ffff;
    x as u32
}

/// Encode a coordinate with the 3-way (octree) interleave.
#[inline]
pub fn encode3(x: u32, y: u32, z: u32) -> u64 {
    split_by_3(x) | split_by_3(z) << 1 | split_by_3(y) << 2
}

/// Decode a 3-way code back to `(x, y, z)`.
#[inline]
pub fn decode3(code: u64) -> UVec3 {
    UVec3::new(
        compact_by_3(code),
        compact_by_3(code >> 2),
        compact_by_3(code >> 1),
    )
}

/// Encode a coordinate with the 6-way (contree) interleave.
#[inline]
pub fn encode6(x: u32, y: u32, z: u32) -> u64 {
    split_by_2x3(x) | split_by_2x3(z) << 2 | split_by_2x3(y) << 4
}

/// Decode a 6-way code back to `(x, y, z)`.
#[inline]
pub fn decode6(code: u64) -> UVec3 {
    UVec3::new(
        compact_by_2x3(code),
        compact_by_2x3(code >> 4),
        compact_by_2x3(code >> 2),
    )
}

/// Child slot (0..8) selected by a coordinate at tree level `level`
/// (0 = finest). Matches one 3-bit group of [`encode3`].
#[inline]
pub fn octree_child(pos: UVec3, level: u32) -> usize {
    let bit = |v: u32| ((v >> level) & 1) as usize;
    bit(pos.x) | bit(pos.z) << 1 | bit(pos.y) << 2
}

/// Child slot (0..64) selected by a coordinate at tree level `level`
/// (0 = finest). Matches one 6-bit group of [`encode6`].
#[inline]
pub fn contree_child(pos: UVec3, level: u32) -> usize {
    let pair = |v: u32| ((v >> (2 * level)) & 3) as usize;
    pair(pos.x) | pair(pos.z) << 2 | pair(pos.y) << 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode3_bit_order() {
        assert_eq!(encode3(1, 0, 0), 0b001);
        assert_eq!(encode3(0, 0, 1), 0b010);
        assert_eq!(encode3(0, 1, 0), 0b100);
        assert_eq!(encode3(2, 0, 0), 0b001_000);
        assert_eq!(encode3(1, 1, 1), 7);
    }

    #[test]
    fn test_encode6_bit_order() {
        assert_eq!(encode6(3, 0, 0), 0b00_00_11);
        assert_eq!(encode6(0, 0, 3), 0b00_11_00);
        assert_eq!(encode6(0, 3, 0), 0b11_00_00);
        assert_eq!(encode6(4, 0, 0), 1 << 6);
        assert_eq!(encode6(1, 2, 3), 1 | 3 << 2 | 2 << 4);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let samples = [
            (0, 0, 0),
            (1, 2, 3),
            (511, 7, 300),
            (0x1f_ffff, 0, 0x1f_ffff),
            (12345, 54321, 99999),
        ];
        for (x, y, z) in samples {
            assert_eq!(decode3(encode3(x, y, z)), UVec3::new(x, y, z));
        }

        let samples6 = [(0, 0, 0), (1, 2, 3), (1023, 4, 77), (0xf_ffff, 1, 0xf_fff0)];
        for (x, y, z) in samples6 {
            assert_eq!(decode6(encode6(x, y, z)), UVec3::new(x, y, z));
        }
    }

    #[test]
    fn test_sequential_codes_cover_cube() {
        let mut seen = vec![false; 64];
        for code in 0..64u64 {
            let p = decode3(code);
            assert!(p.x < 4 && p.y < 4 && p.z < 4);
            seen[(p.x + p.y * 4 + p.z * 16) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_child_index_matches_code_groups() {
        let pos = UVec3::new(5, 3, 6);
        let code = encode3(pos.x, pos.y, pos.z);
        for level in 0..3 {
            assert_eq!(octree_child(pos, level) as u64, (code >> (3 * level)) & 7);
        }

        let pos = UVec3::new(13, 7, 42);
        let code = encode6(pos.x, pos.y, pos.z);
        for level in 0..3 {
            assert_eq!(contree_child(pos, level) as u64, (code >> (6 * level)) & 63);
        }
    }
}
