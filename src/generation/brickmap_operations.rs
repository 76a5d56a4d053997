//! Brickmap operations - brick scan and colour allocation

use glam::{IVec3, UVec3, Vec3};

use super::brickmap_data::{brick_pointer, Brickmap, BrickmapPayload};
use super::colour_pool::{target_type, ColourPool, BLOCK_SIZES};
use super::{BuildError, GenerationInfo, ProgressClock, StopToken};
use crate::constants::brickmap::*;
use crate::source::VoxelSource;

#[inline]
fn quantise(colour: Vec3) -> [u8; 3] {
    let c = (colour.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).ceil();
    [c.x as u8, c.y as u8, c.z as u8]
}

pub fn build_brickmap(
    source: &dyn VoxelSource,
    info: &GenerationInfo,
    stop: &StopToken,
) -> Result<BrickmapPayload, BuildError> {
    let dims = source.dimensions();
    let grid_size = UVec3::new(
        dims.x.div_ceil(BRICK_SIZE),
        dims.y.div_ceil(BRICK_SIZE),
        dims.z.div_ceil(BRICK_SIZE),
    );
    let total = grid_size.x as u64 * grid_size.y as u64 * grid_size.z as u64;

    info.set_voxel_count(0);
    let clock = ProgressClock::start(info);

    let mut brickgrid = vec![EMPTY_BRICK; total as usize];
    let mut brickmaps = Vec::new();
    let mut pool = ColourPool::new();
    // Next scan start per block type.
    let mut hints = [0usize; 3];

    let mut scratch: Vec<[u8; 3]> = Vec::with_capacity(BRICK_VOXELS);
    let mut index = 0usize;
    for by in 0..grid_size.y {
        for bz in 0..grid_size.z {
            for bx in 0..grid_size.x {
                stop.check()?;

                let origin = IVec3::new(bx as i32, by as i32, bz as i32) * BRICK_SIZE as i32;
                let mut occupancy = [0u64; 8];
                scratch.clear();

                for (y, row) in occupancy.iter_mut().enumerate() {
                    for z in 0..BRICK_SIZE {
                        for x in 0..BRICK_SIZE {
                            let pos = origin + IVec3::new(x as i32, y as i32, z as i32);
                            if let Some(colour) = source.sample(pos) {
                                *row |= 1 << (z * 8 + x);
                                scratch.push(quantise(colour));
                            }
                        }
                    }
                }

                if !scratch.is_empty() {
                    let block_type = target_type(scratch.len()).unwrap_or(0);
                    let hint = hints[block_type as usize];
                    let colour_ptr = pool.allocate(&scratch, hint).ok_or_else(|| {
                        BuildError::Structural {
                            structure: "Brickmap",
                            reason: format!("brick with {} colours", scratch.len()),
                        }
                    })?;
                    hints[block_type as usize] = colour_ptr + BLOCK_SIZES[block_type as usize];

                    brickmaps.push(Brickmap {
                        colour_ptr: colour_ptr as u64,
                        occupancy,
                    });
                    brickgrid[index] = brick_pointer(brickmaps.len() - 1);
                    info.add_voxels(scratch.len() as u64);
                }

                index += 1;
                clock.record(index as u64, total);
            }
        }
    }

    info.set_node_count((brickgrid.len() + brickmaps.len()) as u64);
    clock.finish();
    log::debug!(
        "[Brickmap Builder] {} of {} bricks occupied, colour pool {} slots",
        brickmaps.len(),
        brickgrid.len(),
        pool.len()
    );

    Ok(BrickmapPayload {
        brickgrid_size: grid_size,
        brickgrid,
        brickmaps,
        colours: pool.into_slots(),
    })
}
