//! Octree operations - bottom-up build and serialisation
//!
//! Phase A sweeps the cube in 3-way Morton order. Every eight consecutive
//! entries of a depth queue are exactly the children of one node one level
//! up, so the sweep collapses uniform octants as it goes.
//!
//! Phase B writes the tree depth first. Children whose prospective offset
//! reaches `FAR_RESERVE_THRESHOLD` get a far-pointer cell behind the child
//! slots; every reserved cell is used.

use super::octree_data::{IntermediateNode, OctreeNode, OctreePayload};
use super::{BuildError, GenerationInfo, ProgressClock, StopToken};
use crate::constants::octree::*;
use crate::source::{cube_dimensions, VoxelSource};

const STRUCTURE: &str = "Octree";

fn structural(reason: String) -> BuildError {
    BuildError::Structural {
        structure: STRUCTURE,
        reason,
    }
}

/// Quantise a sample to 8 bits per channel.
fn convert(sample: Option<glam::Vec3>) -> IntermediateNode {
    match sample {
        Some(c) => {
            let c = c.clamp(glam::Vec3::ZERO, glam::Vec3::ONE) * 255.0;
            IntermediateNode {
                colour: [c.x as u8, c.y as u8, c.z as u8],
                visible: true,
                ..Default::default()
            }
        }
        None => IntermediateNode::default(),
    }
}

/// Collapsed node if all eight siblings are equal non-parent leaves.
fn collapse(siblings: &[IntermediateNode; 8]) -> Option<IntermediateNode> {
    let first = siblings[0];
    let uniform = siblings
        .iter()
        .all(|n| !n.parent && n.visible == first.visible && n.colour == first.colour);
    uniform.then_some(IntermediateNode {
        colour: first.colour,
        visible: first.visible,
        ..Default::default()
    })
}

/// Ranks (among present children) that need a far-pointer cell.
///
/// `children` yields `(is_parent, block_size)` in ascending child order.
fn far_pointer_ranks(
    children: impl Iterator<Item = (bool, u64)>,
    count: usize,
    threshold: u64,
) -> Vec<usize> {
    let mut ranks = Vec::new();
    let mut preceding_blocks = 0u64;
    for (rank, (parent, block_size)) in children.enumerate() {
        if !parent {
            continue;
        }
        let prospective = (count - rank) as u64 + preceding_blocks;
        if prospective >= threshold {
            ranks.push(rank);
        }
        preceding_blocks += block_size;
    }
    ranks
}

/// Children of `parent`, in ascending child order.
fn children_of<'a>(
    intermediate: &'a [IntermediateNode],
    parent: &IntermediateNode,
) -> &'a [IntermediateNode] {
    let count = parent.child_mask.count_ones() as usize;
    let last = parent.child_start_index as usize;
    &intermediate[last + 1 - count..=last]
}

/// Phase A: Morton sweep with per-depth queues.
fn sweep(
    source: &dyn VoxelSource,
    side: u32,
    info: &GenerationInfo,
    clock: &ProgressClock<'_>,
    stop: &StopToken,
    far_threshold: u64,
) -> Result<(IntermediateNode, Vec<IntermediateNode>), BuildError> {
    let side = side as u64;
    let final_code = side
        .checked_mul(side)
        .and_then(|square| square.checked_mul(side))
        .ok_or_else(|| structural(format!("cube side {} overflows the Morton range", side)))?;

    let mut queues = [[IntermediateNode::default(); 8]; MAX_DEPTH];
    let mut queue_sizes = [0usize; MAX_DEPTH];
    let mut intermediate: Vec<IntermediateNode> = Vec::new();

    let leaf_depth = LEAF_DEPTH as usize;
    let mut depth = leaf_depth;

    for code in 0..final_code {
        stop.check()?;

        depth = leaf_depth;
        queues[depth][queue_sizes[depth]] = convert(source.sample_morton(code));
        queue_sizes[depth] += 1;
        clock.record(code + 1, final_code);

        while depth > 0 && queue_sizes[depth] == 8 {
            stop.check()?;

            let siblings = &queues[depth];
            let node = match collapse(siblings) {
                Some(collapsed) => collapsed,
                None => {
                    let mut child_mask = 0u8;
                    let mut children_blocks = Vec::with_capacity(8);
                    for (i, child) in siblings.iter().enumerate() {
                        if !child.visible {
                            continue;
                        }
                        child_mask |= 1 << i;
                        intermediate.push(*child);
                        children_blocks.push((child.parent, child.block_size));
                        if !child.parent {
                            info.add_voxels(8u64.pow((LEAF_DEPTH as usize - depth) as u32));
                        }
                    }

                    let count = children_blocks.len();
                    let far =
                        far_pointer_ranks(children_blocks.iter().copied(), count, far_threshold)
                            .len();
                    let nested: u64 = children_blocks
                        .iter()
                        .filter(|(parent, _)| *parent)
                        .map(|(_, size)| size)
                        .sum();

                    IntermediateNode {
                        colour: [0; 3],
                        visible: child_mask != 0,
                        parent: true,
                        child_mask,
                        child_start_index: (intermediate.len() - 1) as u32,
                        block_size: (count + far) as u64 + nested,
                    }
                }
            };

            queues[depth - 1][queue_sizes[depth - 1]] = node;
            queue_sizes[depth - 1] += 1;
            queue_sizes[depth] = 0;
            depth -= 1;
        }
    }

    if queue_sizes[depth] != 1 {
        return Err(structural(format!(
            "expected a single root at depth {}, found {} entries",
            depth, queue_sizes[depth]
        )));
    }

    let root = queues[depth][0];
    if !root.parent && root.visible {
        info.add_voxels(8u64.pow((LEAF_DEPTH as usize - depth) as u32));
    }
    Ok((root, intermediate))
}

/// Phase B: write `parent`'s children block at the end of `nodes`.
fn write_children(
    intermediate: &[IntermediateNode],
    parent: &IntermediateNode,
    nodes: &mut Vec<OctreeNode>,
    stop: &StopToken,
    far_threshold: u64,
) -> Result<(), BuildError> {
    stop.check()?;

    let children = children_of(intermediate, parent);
    let count = children.len();
    let base = nodes.len();

    for child in children {
        nodes.push(if child.parent {
            OctreeNode::inner(child.child_mask, 0)
        } else {
            OctreeNode::leaf(child.colour)
        });
    }

    let far_ranks = far_pointer_ranks(
        children.iter().map(|c| (c.parent, c.block_size)),
        count,
        far_threshold,
    );
    nodes.extend(far_ranks.iter().map(|_| OctreeNode::far(0)));

    let mut far_used = 0usize;
    for (rank, child) in children.iter().enumerate() {
        if !child.parent {
            continue;
        }

        let child_start = nodes.len();
        write_children(intermediate, child, nodes, stop, far_threshold)?;

        let slot = base + rank;
        if far_ranks.get(far_used) == Some(&rank) {
            let far_index = base + count + far_used;
            let delta = u32::try_from(child_start - far_index).map_err(|_| {
                structural(format!(
                    "far pointer delta {} exceeds 32 bits",
                    child_start - far_index
                ))
            })?;
            nodes[far_index] = OctreeNode::far(delta);
            nodes[slot] = OctreeNode::inner(child.child_mask, FAR_SENTINEL + far_used as u32);
            far_used += 1;
        } else {
            let offset = child_start - slot;
            if offset >= FAR_SENTINEL as usize {
                return Err(structural(format!(
                    "direct offset {:#x} without a reserved far pointer",
                    offset
                )));
            }
            nodes[slot] = OctreeNode::inner(child.child_mask, offset as u32);
        }
    }

    if far_used != far_ranks.len() {
        return Err(structural(format!(
            "reserved {} far pointers but used {}",
            far_ranks.len(),
            far_used
        )));
    }
    Ok(())
}

/// Build and serialise the octree of `source`.
pub fn build_octree(
    source: &dyn VoxelSource,
    info: &GenerationInfo,
    stop: &StopToken,
) -> Result<OctreePayload, BuildError> {
    build_with_threshold(source, info, stop, FAR_RESERVE_THRESHOLD)
}

fn build_with_threshold(
    source: &dyn VoxelSource,
    info: &GenerationInfo,
    stop: &StopToken,
    far_threshold: u64,
) -> Result<OctreePayload, BuildError> {
    let dimensions = cube_dimensions(source.dimensions_div_n(2));
    let side = dimensions.x;
    if side > MAX_SIDE {
        return Err(structural(format!(
            "cube side {} exceeds the largest side {}",
            side, MAX_SIDE
        )));
    }

    info.set_voxel_count(0);
    let clock = ProgressClock::start(info);

    let (root, intermediate) = sweep(source, side, info, &clock, stop, far_threshold)?;

    let mut nodes = Vec::with_capacity(intermediate.len() + 1);
    if root.parent {
        nodes.push(OctreeNode::inner(root.child_mask, 1));
        write_children(&intermediate, &root, &mut nodes, stop, far_threshold)?;
    } else if root.visible {
        nodes.push(OctreeNode::leaf(root.colour));
    } else {
        nodes.push(OctreeNode::inner(0, 0));
    }

    info.set_node_count(nodes.len() as u64);
    clock.finish();
    log::debug!(
        "[Octree Builder] {} nodes from {} intermediate entries over a {}^3 cube",
        nodes.len(),
        intermediate.len(),
        side
    );

    Ok(OctreePayload { dimensions, nodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DenseSource, EquationSource};
    use glam::{UVec3, Vec3};

    fn build(source: &dyn VoxelSource) -> (OctreePayload, GenerationInfo) {
        let info = GenerationInfo::new();
        let payload = build_octree(source, &info, &StopToken::new()).unwrap();
        (payload, info)
    }

    #[test]
    fn test_full_cube_collapses_to_single_leaf() {
        let source = EquationSource::new(UVec3::splat(2), |_| Some(Vec3::ONE));
        let (payload, info) = build(&source);

        assert_eq!(payload.nodes, vec![OctreeNode::leaf([255, 255, 255])]);
        assert_eq!(info.voxel_count(), 8);
        assert_eq!(info.node_count(), 1);
        assert_eq!(info.completion(), 1.0);
    }

    #[test]
    fn test_single_red_voxel_in_4_cube() {
        let mut source = DenseSource::new(UVec3::splat(4));
        source.set(UVec3::ZERO, Some(Vec3::new(1.0, 0.0, 0.0)));
        let (payload, info) = build(&source);

        let root = payload.nodes[0];
        assert!(!root.is_leaf());
        assert_eq!(root.child_mask(), 0b0000_0001);

        let leaves: Vec<_> = payload.nodes.iter().filter(|n| n.is_leaf()).collect();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].rgb(), [255, 0, 0]);

        assert!(payload.nodes.len() <= 1 + 8 * 2);
        assert_eq!(info.voxel_count(), 1);

        assert_eq!(payload.lookup(UVec3::ZERO), Some([255, 0, 0]));
        assert_eq!(payload.lookup(UVec3::new(1, 0, 0)), None);
        assert_eq!(payload.lookup(UVec3::new(3, 3, 3)), None);
    }

    #[test]
    fn test_empty_source_is_empty_root() {
        let source = DenseSource::new(UVec3::splat(4));
        let (payload, info) = build(&source);
        assert_eq!(payload.nodes, vec![OctreeNode::inner(0, 0)]);
        assert_eq!(info.voxel_count(), 0);
        assert_eq!(payload.lookup(UVec3::new(1, 2, 3)), None);
    }

    #[test]
    fn test_round_trip_visibility_and_colour() {
        let source = EquationSource::new(UVec3::new(13, 9, 11), |p| {
            let inside = (p.x - 6).pow(2) + (p.y - 4).pow(2) + (p.z - 5).pow(2) <= 20;
            let banded = p.y < 2;
            (inside || banded).then(|| Vec3::new(p.x as f32 / 12.0, 0.5, p.z as f32 / 10.0))
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
                    if let (Some(rgb), Some(c)) = (found, expected) {
                        let q = (c * 255.0).as_uvec3();
                        assert_eq!(rgb, [q.x as u8, q.y as u8, q.z as u8]);
                        present += 1;
                    }
                }
            }
        }
        assert_eq!(info.voxel_count(), present);
    }

    #[test]
    fn test_every_offset_points_inside_the_array() {
        let source = EquationSource::new(UVec3::splat(8), |p| {
            ((p.x ^ p.y ^ p.z) & 1 == 0).then_some(Vec3::splat(0.25))
        });
        let (payload, _) = build(&source);
        for (i, node) in payload.nodes.iter().enumerate() {
            if !node.is_leaf() && node.child_mask() != 0 && node.offset() < FAR_SENTINEL {
                let target = i + node.offset() as usize;
                assert!(target < payload.nodes.len());
            }
        }
    }

    #[test]
    fn test_far_pointer_reservation_matches_threshold() {
        // Two inner children where the first block is large enough to push
        // the second past the reservation threshold.
        let big = FAR_RESERVE_THRESHOLD;
        let ranks = far_pointer_ranks([(true, big), (true, 10), (false, 0)].into_iter(), 3, big);
        assert_eq!(ranks, vec![1]);

        let ranks = far_pointer_ranks([(true, 5), (true, 10)].into_iter(), 2, big);
        assert!(ranks.is_empty());
    }

    #[test]
    fn test_far_pointers_through_a_real_build() {
        let source = EquationSource::new(UVec3::splat(16), |p| {
            ((p.x ^ p.y ^ p.z) & 1 == 0).then(|| Vec3::new(p.x as f32 / 15.0, p.y as f32 / 15.0, 0.5))
        });
        let info = GenerationInfo::new();
        let payload = build_with_threshold(&source, &info, &StopToken::new(), 8).unwrap();

        let far_referring = payload
            .nodes
            .iter()
            .filter(|n| !n.is_leaf() && n.child_mask() != 0 && n.offset() >= FAR_SENTINEL)
            .count();
        assert!(far_referring > 0);

        let mut present = 0u64;
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    let pos = UVec3::new(x, y, z);
                    let expected = source.sample(pos.as_ivec3());
                    let found = payload.lookup(pos);
                    assert_eq!(found.is_some(), expected.is_some(), "visibility at {:?}", pos);
                    if let (Some(rgb), Some(c)) = (found, expected) {
                        let q = (c * 255.0).as_uvec3();
                        assert_eq!(rgb, [q.x as u8, q.y as u8, q.z as u8], "colour at {:?}", pos);
                        present += 1;
                    }
                }
            }
        }
        assert_eq!(present, 16 * 16 * 16 / 2);
        assert_eq!(info.voxel_count(), present);
        assert_eq!(info.node_count(), payload.nodes.len() as u64);
    }

    #[test]
    fn test_threshold_does_not_change_visible_content() {
        let source = EquationSource::new(UVec3::new(9, 16, 7), |p| {
            (p.y <= p.x + p.z).then_some(Vec3::new(0.1, 0.9, 0.3))
        });
        let (near, _) = build(&source);
        let far = build_with_threshold(&source, &GenerationInfo::new(), &StopToken::new(), 3).unwrap();
        assert!(far.nodes.len() > near.nodes.len());
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    let pos = UVec3::new(x, y, z);
                    assert_eq!(near.lookup(pos), far.lookup(pos), "mismatch at {:?}", pos);
                }
            }
        }
    }

    #[test]
    fn test_side_beyond_morton_range_is_structural() {
        let source = EquationSource::new(UVec3::new(1 << 22, 1, 1), |_| Some(Vec3::ONE));
        let info = GenerationInfo::new();
        let result = build_octree(&source, &info, &StopToken::new());
        assert!(matches!(result, Err(BuildError::Structural { .. })));
        assert_eq!(info.voxel_count(), 0);
    }

    #[test]
    fn test_sweep_rejects_overflowing_code_range() {
        let source = EquationSource::new(UVec3::ONE, |_| None);
        let info = GenerationInfo::new();
        let clock = ProgressClock::start(&info);
        let result = sweep(&source, 1 << 22, &info, &clock, &StopToken::new(), FAR_RESERVE_THRESHOLD);
        assert!(matches!(result, Err(BuildError::Structural { .. })));
    }

    #[test]
    fn test_cancelled_build() {
        let source = EquationSource::new(UVec3::splat(8), |_| Some(Vec3::ONE));
        let stop = StopToken::new();
        stop.request_stop();
        assert_eq!(
            build_octree(&source, &GenerationInfo::new(), &stop).unwrap_err(),
            BuildError::Cancelled
        );
    }
}
