//! Contree operations - 64-ary bottom-up build
//!
//! Same sweep as the octree with 6-way Morton codes and 64-entry queues.
//! Serialisation walks the intermediate array backwards, so parents land
//! before their children and offsets are plain index differences.

use glam::Vec3;

use super::contree_data::{ContreeNode, ContreePayload, IntermediateNode};
use super::{BuildError, GenerationInfo, ProgressClock, StopToken};
use crate::constants::contree::*;
use crate::source::{cube_dimensions, VoxelSource};

const STRUCTURE: &str = "Contree";
const FANOUT: usize = 64;

fn convert(sample: Option<Vec3>) -> IntermediateNode {
    match sample {
        Some(colour) => IntermediateNode {
            colour,
            visible: true,
            ..Default::default()
        },
        None => IntermediateNode::default(),
    }
}

/// Collapsed node if all siblings are non-parent leaves that serialise to
/// the same 48-bit colour (or are all empty).
fn collapse(siblings: &[IntermediateNode]) -> Option<IntermediateNode> {
    let first = siblings[0];
    let first_word = ContreeNode::leaf(first.colour);
    let uniform = siblings.iter().all(|n| {
        !n.parent
            && n.visible == first.visible
            && (!n.visible || ContreeNode::leaf(n.colour) == first_word)
    });
    uniform.then_some(IntermediateNode {
        colour: first.colour,
        visible: first.visible,
        ..Default::default()
    })
}

fn quantise(colour: Vec3) -> [u8; 3] {
    let c = (colour.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).as_uvec3();
    [c.x as u8, c.y as u8, c.z as u8]
}

fn voxels_at(depth: usize) -> u64 {
    64u64.pow(LEAF_DEPTH - depth as u32)
}

/// Build and serialise the contree of `source`.
pub fn build_contree(
    source: &dyn VoxelSource,
    info: &GenerationInfo,
    stop: &StopToken,
) -> Result<ContreePayload, BuildError> {
    let dimensions = cube_dimensions(source.dimensions_div_n(4));
    let side = dimensions.x as u64;
    if side > 1 << (2 * LEAF_DEPTH) {
        return Err(BuildError::Structural {
            structure: STRUCTURE,
            reason: format!("cube side {} exceeds {} levels", side, LEAF_DEPTH),
        });
    }

    info.set_voxel_count(0);
    let clock = ProgressClock::start(info);

    let final_code = side * side * side;
    let mut queues: [Vec<IntermediateNode>; MAX_DEPTH] =
        std::array::from_fn(|_| Vec::with_capacity(FANOUT));
    let mut intermediate: Vec<IntermediateNode> = Vec::new();

    let leaf_depth = LEAF_DEPTH as usize;
    let mut depth = leaf_depth;

    for code in 0..final_code {
        stop.check()?;

        depth = leaf_depth;
        queues[depth].push(convert(source.sample_morton2(code)));
        clock.record(code + 1, final_code);

        while depth > 0 && queues[depth].len() == FANOUT {
            stop.check()?;

            let node = match collapse(&queues[depth]) {
                Some(collapsed) => collapsed,
                None => {
                    let mut child_mask = 0u64;
                    let mut colour_sum = Vec3::ZERO;
                    for i in (0..FANOUT).rev() {
                        let child = queues[depth][i];
                        if !child.visible {
                            continue;
                        }
                        child_mask |= 1 << i;
                        colour_sum += child.colour;
                        intermediate.push(child);
                        if !child.parent {
                            info.add_voxels(voxels_at(depth));
                        }
                    }

                    let present = child_mask.count_ones().max(1) as f32;
                    IntermediateNode {
                        colour: colour_sum / present,
                        visible: child_mask != 0,
                        parent: true,
                        child_mask,
                        child_start_index: (intermediate.len() - 1) as u32,
                    }
                }
            };

            queues[depth - 1].push(node);
            queues[depth].clear();
            depth -= 1;
        }
    }

    if queues[depth].len() != 1 {
        return Err(BuildError::Structural {
            structure: STRUCTURE,
            reason: format!(
                "expected a single root at depth {}, found {} entries",
                depth,
                queues[depth].len()
            ),
        });
    }

    let root = queues[depth][0];
    intermediate.push(root);
    if !root.parent && root.visible {
        info.add_voxels(voxels_at(depth));
    }

    let mut nodes = Vec::with_capacity(intermediate.len());
    for (index, node) in intermediate.iter().enumerate().rev() {
        stop.check()?;

        if node.parent {
            let offset = u32::try_from(index - node.child_start_index as usize).map_err(|_| {
                BuildError::Structural {
                    structure: STRUCTURE,
                    reason: format!("child offset from node {} exceeds 32 bits", index),
                }
            })?;
            nodes.push(ContreeNode::inner(
                node.child_mask,
                offset,
                quantise(node.colour),
            ));
        } else if node.visible {
            nodes.push(ContreeNode::leaf(node.colour));
        } else {
            // Only an empty root is invisible.
            nodes.push(ContreeNode::inner(0, 0, [0; 3]));
        }
    }

    info.set_node_count(nodes.len() as u64);
    clock.finish();
    log::debug!(
        "[Contree Builder] {} nodes over a {}^3 cube",
        nodes.len(),
        side
    );

    Ok(ContreePayload { dimensions, nodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DenseSource, EquationSource};
    use glam::UVec3;

    fn build(source: &dyn VoxelSource) -> (ContreePayload, GenerationInfo) {
        let info = GenerationInfo::new();
        let payload = build_contree(source, &info, &StopToken::new()).unwrap();
        (payload, info)
    }

    #[test]
    fn test_full_block_collapses() {
        let source = EquationSource::new(UVec3::splat(4), |_| Some(Vec3::ONE));
        let (payload, info) = build(&source);
        assert_eq!(payload.nodes.len(), 1);
        assert!(payload.nodes[0].is_leaf());
        assert_eq!(info.voxel_count(), 64);
    }

    #[test]
    fn test_colours_equal_after_quantisation_collapse() {
        let source = EquationSource::new(UVec3::splat(4), |p| {
            let nudge = if (p.x + p.y + p.z) % 2 == 0 { 0.0 } else { 1e-7 };
            Some(Vec3::splat(0.5 + nudge))
        });
        let (payload, info) = build(&source);
        assert_eq!(payload.nodes, vec![ContreeNode::leaf(Vec3::splat(0.5))]);
        assert_eq!(info.voxel_count(), 64);
    }

    #[test]
    fn test_collapsed_child_counts_its_volume() {
        let source = EquationSource::new(UVec3::splat(16), |p| {
            let in_block = p.x < 4 && p.y < 4 && p.z < 4;
            let lone = p.x == 9 && p.y == 13 && p.z == 2;
            (in_block || lone).then_some(Vec3::new(0.2, 0.4, 0.6))
        });
        let (payload, info) = build(&source);

        assert_eq!(info.voxel_count(), 65);

        let root = payload.nodes[0];
        assert!(!root.is_leaf());
        let block_child = payload.nodes[root.offset() as usize];
        assert!(block_child.is_leaf());
    }

    #[test]
    fn test_round_trip_lookup() {
        let source = EquationSource::new(UVec3::new(16, 10, 13), |p| {
            ((p.x * 3 + p.y * 5 + p.z) % 7 < 3).then(|| Vec3::new(p.x as f32 / 15.0, 1.0, 0.0))
        });
        let (payload, info) = build(&source);
        assert_eq!(payload.dimensions, UVec3::splat(16));

        let mut present = 0u64;
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    let pos = UVec3::new(x, y, z);
                    let expected = source.sample(pos.as_ivec3());
                    let found = payload.lookup(pos);
                    assert_eq!(found.is_some(), expected.is_some(), "visibility at {:?}", pos);
                    if let (Some(a), Some(b)) = (found, expected) {
                        assert!((a - b).abs().max_element() < 1.0 / 65535.0 + 1e-6);
                        present += 1;
                    }
                }
            }
        }
        assert_eq!(info.voxel_count(), present);
    }

    #[test]
    fn test_empty_source() {
        let source = DenseSource::new(UVec3::splat(4));
        let (payload, info) = build(&source);
        assert_eq!(payload.nodes, vec![ContreeNode::inner(0, 0, [0; 3])]);
        assert_eq!(info.voxel_count(), 0);
        assert_eq!(payload.lookup(UVec3::ZERO), None);
    }

    #[test]
    fn test_inner_colour_is_average_of_children() {
        let mut source = DenseSource::new(UVec3::splat(4));
        source.set(UVec3::new(0, 0, 0), Some(Vec3::new(1.0, 0.0, 0.0)));
        source.set(UVec3::new(1, 0, 0), Some(Vec3::new(0.0, 0.0, 1.0)));
        let (payload, _) = build(&source);
        assert_eq!(payload.nodes[0].inner_rgb(), [127, 0, 127]);
    }
}
